//! 观影会话进出账
//!
//! 订阅观影频道触发 join，退订/断连触发 leave（由传输层按连接属性
//! 判定内容 id 后调用）。重复 leave、缺失 join 都是良性 no-op。
//! 变更通过跨实例广播推给该内容观影频道的所有订阅者。

use std::sync::Arc;

use domain::repositories::WatchingSessionRepository;
use domain::{WatchedContent, Watcher, WatchingSession};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broadcaster::{watch_destination, FanoutBroadcaster, OutboundMessage};
use crate::error::ApplicationError;

pub const WATCHING_CHANGE_EVENT_NAME: &str = "watching-session-change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchingSessionChangeType {
    Join,
    Leave,
}

/// 广播给观影频道订阅者的变更事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchingSessionChange {
    pub change_type: WatchingSessionChangeType,
    pub session: WatchingSession,
    /// 变更后该内容的观看者数量
    pub watcher_count: u64,
}

pub struct WatchingSessionService {
    repository: Arc<dyn WatchingSessionRepository>,
    broadcaster: Arc<dyn FanoutBroadcaster>,
}

impl WatchingSessionService {
    pub fn new(
        repository: Arc<dyn WatchingSessionRepository>,
        broadcaster: Arc<dyn FanoutBroadcaster>,
    ) -> Self {
        Self {
            repository,
            broadcaster,
        }
    }

    /// 用户订阅了某内容的观影频道
    ///
    /// 无会话 → 新建（计数 1）；同内容已有会话 → 计数 +1（第二个
    /// 标签页）；不同内容已有会话 → 先对旧内容广播 leave 并删除，
    /// 再为新内容建会话。
    pub async fn join_session(
        &self,
        content: WatchedContent,
        watcher: Watcher,
    ) -> Result<WatchingSessionChange, ApplicationError> {
        let content_id = content.id;
        let existing = self.repository.find_by_watcher_id(watcher.id).await?;

        let session = match existing {
            Some(mut session) if session.content.id == content_id => {
                session.increment_connections();
                session
            }
            Some(session) => {
                // 观看者切换了内容：旧会话按离开处理
                self.broadcast_leave_of(&session).await;
                self.repository.delete(&session).await?;
                WatchingSession::new(watcher, content)
            }
            None => WatchingSession::new(watcher, content),
        };

        self.repository.save(&session).await?;

        let change = WatchingSessionChange {
            change_type: WatchingSessionChangeType::Join,
            watcher_count: self.repository.count_by_content_id(content_id).await?,
            session,
        };
        self.broadcast_change(content_id, &change).await;

        Ok(change)
    }

    /// 用户退订/断开了某内容的观影频道
    ///
    /// 无会话或会话属于其他内容 → 良性 no-op，不广播不报错。
    /// 计数降为 0 时删除条目并广播 leave；仍有连接时只落库。
    pub async fn leave_session(
        &self,
        content_id: Uuid,
        watcher_id: Uuid,
    ) -> Result<Option<WatchingSessionChange>, ApplicationError> {
        let Some(mut session) = self.repository.find_by_watcher_id(watcher_id).await? else {
            debug!(watcher_id = %watcher_id, "离开请求没有对应会话，忽略");
            return Ok(None);
        };
        if session.content.id != content_id {
            debug!(
                watcher_id = %watcher_id,
                content_id = %content_id,
                "离开请求的内容与当前会话不符，忽略"
            );
            return Ok(None);
        }

        session.decrement_connections();

        if !session.has_no_connections() {
            // 同一观看者还有其他连接在看，不算离开
            self.repository.save(&session).await?;
            return Ok(None);
        }

        self.repository.delete(&session).await?;

        let change = WatchingSessionChange {
            change_type: WatchingSessionChangeType::Leave,
            watcher_count: self.repository.count_by_content_id(content_id).await?,
            session,
        };
        self.broadcast_change(content_id, &change).await;

        Ok(Some(change))
    }

    async fn broadcast_leave_of(&self, session: &WatchingSession) {
        // 切换内容时旧频道的观看者数量要减去本人
        let count = match self.repository.count_by_content_id(session.content.id).await {
            Ok(count) => count.saturating_sub(1),
            Err(err) => {
                warn!(error = %err, "查询观看者数量失败");
                return;
            }
        };
        let change = WatchingSessionChange {
            change_type: WatchingSessionChangeType::Leave,
            session: session.clone(),
            watcher_count: count,
        };
        self.broadcast_change(session.content.id, &change).await;
    }

    async fn broadcast_change(&self, content_id: Uuid, change: &WatchingSessionChange) {
        let payload = match serde_json::to_string(change) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "序列化会话变更失败");
                return;
            }
        };
        let message = OutboundMessage {
            destination: watch_destination(content_id),
            event_name: WATCHING_CHANGE_EVENT_NAME.to_string(),
            payload,
        };
        // 推送是便民通道，广播失败只记日志
        if let Err(err) = self.broadcaster.broadcast(message).await {
            warn!(content_id = %content_id, error = %err, "广播会话变更失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::RepositoryResult;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::broadcaster::BroadcastError;

    /// 内存版会话存储：watcher → 会话，内容计数按会话推导
    #[derive(Default)]
    struct InMemorySessions {
        sessions: Mutex<HashMap<Uuid, WatchingSession>>,
    }

    #[async_trait]
    impl WatchingSessionRepository for InMemorySessions {
        async fn save(&self, session: &WatchingSession) -> RepositoryResult<()> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.watcher.id, session.clone());
            Ok(())
        }

        async fn find_by_watcher_id(
            &self,
            watcher_id: Uuid,
        ) -> RepositoryResult<Option<WatchingSession>> {
            Ok(self.sessions.lock().unwrap().get(&watcher_id).cloned())
        }

        async fn delete(&self, session: &WatchingSession) -> RepositoryResult<()> {
            self.sessions.lock().unwrap().remove(&session.watcher.id);
            Ok(())
        }

        async fn count_by_content_id(&self, content_id: Uuid) -> RepositoryResult<u64> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.content.id == content_id)
                .count() as u64)
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        messages: Mutex<Vec<OutboundMessage>>,
    }

    impl RecordingBroadcaster {
        fn changes(&self) -> Vec<WatchingSessionChange> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|m| serde_json::from_str(&m.payload).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl FanoutBroadcaster for RecordingBroadcaster {
        async fn broadcast(&self, message: OutboundMessage) -> Result<(), BroadcastError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn watcher(name: &str) -> Watcher {
        Watcher {
            id: Uuid::new_v4(),
            name: name.to_string(),
            profile_image_path: None,
        }
    }

    fn content(title: &str) -> WatchedContent {
        WatchedContent {
            id: Uuid::new_v4(),
            title: title.to_string(),
        }
    }

    fn service() -> (
        WatchingSessionService,
        Arc<InMemorySessions>,
        Arc<RecordingBroadcaster>,
    ) {
        let repo = Arc::new(InMemorySessions::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        (
            WatchingSessionService::new(repo.clone(), broadcaster.clone()),
            repo,
            broadcaster,
        )
    }

    #[tokio::test]
    async fn two_tabs_join_and_leave_until_entry_removed() {
        let (service, repo, _) = service();
        let content = content("movie");
        let a = watcher("A");

        // 第一个标签页
        let change = service.join_session(content.clone(), a.clone()).await.unwrap();
        assert_eq!(change.session.connection_count, 1);
        assert_eq!(change.watcher_count, 1);

        // 第二个标签页
        let change = service.join_session(content.clone(), a.clone()).await.unwrap();
        assert_eq!(change.session.connection_count, 2);
        assert_eq!(change.watcher_count, 1);

        // 第一个标签页断开：仍有连接，不广播
        let result = service.leave_session(content.id, a.id).await.unwrap();
        assert!(result.is_none());
        assert_eq!(
            repo.find_by_watcher_id(a.id).await.unwrap().unwrap().connection_count,
            1
        );

        // 第二个标签页断开：条目删除
        let change = service.leave_session(content.id, a.id).await.unwrap().unwrap();
        assert_eq!(change.change_type, WatchingSessionChangeType::Leave);
        assert_eq!(change.watcher_count, 0);
        assert!(repo.find_by_watcher_id(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_leave_is_a_noop_without_broadcast() {
        let (service, _, broadcaster) = service();
        let content = content("movie");
        let a = watcher("A");

        service.join_session(content.clone(), a.clone()).await.unwrap();
        service.leave_session(content.id, a.id).await.unwrap();
        let broadcasts_after_leave = broadcaster.messages.lock().unwrap().len();

        // 重复断开
        let result = service.leave_session(content.id, a.id).await.unwrap();
        assert!(result.is_none());
        assert_eq!(broadcaster.messages.lock().unwrap().len(), broadcasts_after_leave);
    }

    #[tokio::test]
    async fn leave_for_other_content_is_ignored() {
        let (service, repo, _) = service();
        let watched = content("movie");
        let other = content("other");
        let a = watcher("A");

        service.join_session(watched.clone(), a.clone()).await.unwrap();
        let result = service.leave_session(other.id, a.id).await.unwrap();

        assert!(result.is_none());
        assert!(repo.find_by_watcher_id(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn switching_content_broadcasts_leave_for_previous() {
        let (service, repo, broadcaster) = service();
        let first = content("first");
        let second = content("second");
        let a = watcher("A");

        service.join_session(first.clone(), a.clone()).await.unwrap();
        service.join_session(second.clone(), a.clone()).await.unwrap();

        let session = repo.find_by_watcher_id(a.id).await.unwrap().unwrap();
        assert_eq!(session.content.id, second.id);
        assert_eq!(session.connection_count, 1);

        let changes = broadcaster.changes();
        // join(first)、leave(first)、join(second)
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].change_type, WatchingSessionChangeType::Leave);
        assert_eq!(changes[1].session.content.id, first.id);
        assert_eq!(changes[1].watcher_count, 0);
        assert_eq!(changes[2].change_type, WatchingSessionChangeType::Join);
    }

    #[tokio::test]
    async fn watcher_count_tracks_distinct_watchers() {
        let (service, _, _) = service();
        let content = content("movie");

        let change = service.join_session(content.clone(), watcher("A")).await.unwrap();
        assert_eq!(change.watcher_count, 1);
        let change = service.join_session(content.clone(), watcher("B")).await.unwrap();
        assert_eq!(change.watcher_count, 2);
    }
}
