//! SSE 连接注册表与事件投递
//!
//! 注册表是每实例独享的（绝不跨实例共享连接状态），以注入组件的
//! 方式持有，便于测试中创建相互隔离的实例。每条连接的生命周期：
//! OPEN → {COMPLETED | TIMED_OUT | ERRORED}，三个终态都收敛到
//! "从注册表移除"，由单次触发标志保证不会重复移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::RepositoryResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broadcaster::{parse_user_destination, OutboundDispatcher, OutboundMessage};

/// 建连后立即推送的同步事件名
pub const CONNECTED_EVENT_NAME: &str = "connected";

/// 周期心跳事件名，不进缓存不参与重放
pub const HEARTBEAT_EVENT_NAME: &str = "heartbeat";

/// 一条下发给客户端的事件
///
/// id 采用 UUIDv7：高位携带毫秒时间戳，字典序即时间序，
/// 断线重连时客户端用 Last-Event-ID 换取缓存中更新的事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseEvent {
    pub id: Uuid,
    pub name: String,
    pub data: String,
}

impl SseEvent {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            data: data.into(),
        }
    }

    /// 事件 id 高 48 位中的毫秒时间戳
    pub fn timestamp_millis(id: &Uuid) -> u64 {
        ((id.as_u128() >> 80) & 0xFFFF_FFFF_FFFF) as u64
    }
}

/// 连接终止原因，三者之一恰好发生一次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Completed,
    TimedOut,
    Errored,
}

/// 短时事件缓存接口
///
/// 仅为跨越短暂重连间隙的尽力恢复，有界（条数上限 + TTL），
/// 不是持久化保证。
#[async_trait]
pub trait EventCache: Send + Sync {
    /// 缓存一条已下发（或准备下发）的事件
    async fn cache_event(&self, user_id: Uuid, event: &SseEvent) -> RepositoryResult<()>;

    /// 取出 id 大于 last_event_id 的缓存事件，按 id 升序
    async fn events_after(
        &self,
        user_id: Uuid,
        last_event_id: Uuid,
    ) -> RepositoryResult<Vec<SseEvent>>;
}

/// 内存版事件缓存，单实例部署与测试用
///
/// 每用户条数上限 + 整键 TTL 双重有界；过期键在每次写入时清扫，
/// 读到过期键视同不存在。
pub struct InMemoryEventCache {
    max_size: usize,
    ttl: Duration,
    events: tokio::sync::RwLock<HashMap<Uuid, UserEvents>>,
}

struct UserEvents {
    last_write: Instant,
    entries: Vec<SseEvent>,
}

impl InMemoryEventCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            events: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventCache for InMemoryEventCache {
    async fn cache_event(&self, user_id: Uuid, event: &SseEvent) -> RepositoryResult<()> {
        let mut events = self.events.write().await;
        events.retain(|_, user| user.last_write.elapsed() < self.ttl);

        let user = events.entry(user_id).or_insert_with(|| UserEvents {
            last_write: Instant::now(),
            entries: Vec::new(),
        });
        user.last_write = Instant::now();
        user.entries.push(event.clone());
        if user.entries.len() > self.max_size {
            let excess = user.entries.len() - self.max_size;
            user.entries.drain(..excess);
        }
        Ok(())
    }

    async fn events_after(
        &self,
        user_id: Uuid,
        last_event_id: Uuid,
    ) -> RepositoryResult<Vec<SseEvent>> {
        let events = self.events.read().await;
        let mut found: Vec<SseEvent> = events
            .get(&user_id)
            .filter(|user| user.last_write.elapsed() < self.ttl)
            .map(|user| {
                user.entries
                    .iter()
                    .filter(|e| e.id > last_event_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|e| e.id);
        Ok(found)
    }
}

/// 本地持有的一条连接
struct SseConnection {
    connection_id: Uuid,
    sender: mpsc::UnboundedSender<SseEvent>,
    created_at: DateTime<Utc>,
    closed: Arc<AtomicBool>,
}

/// 交给传输层消费的连接句柄
///
/// 传输层（HTTP 框架，范围之外）循环 recv 并写响应流；
/// 句柄被丢弃即视为连接正常完成。
pub struct SseHandle {
    pub user_id: Uuid,
    connection_id: Uuid,
    receiver: mpsc::UnboundedReceiver<SseEvent>,
    registry: Arc<SseRegistry>,
}

impl SseHandle {
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SseEvent> {
        self.receiver.try_recv().ok()
    }

    /// 主动结束连接（客户端正常关闭）
    pub fn complete(&self) {
        self.registry
            .finish(self.user_id, self.connection_id, DisconnectReason::Completed);
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.registry
            .finish(self.user_id, self.connection_id, DisconnectReason::Completed);
    }
}

/// 每实例 SSE 连接注册表
pub struct SseRegistry {
    connections: RwLock<HashMap<Uuid, SseConnection>>,
    event_cache: Arc<dyn EventCache>,
    connection_timeout: Duration,
}

impl SseRegistry {
    pub fn new(event_cache: Arc<dyn EventCache>, connection_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            event_cache,
            connection_timeout,
        }
    }

    /// 注册新连接
    ///
    /// 同一用户在本实例已有连接时先将旧连接置为完成再替换；
    /// 每用户每实例最多一条活动连接。到期超时由后台任务触发，
    /// 是正常的非错误终态。
    pub fn register(self: &Arc<Self>, user_id: Uuid) -> SseHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        let closed = Arc::new(AtomicBool::new(false));

        {
            let mut connections = self.connections.write().unwrap();
            if let Some(existing) = connections.remove(&user_id) {
                // 旧连接恰好一次地转入 COMPLETED
                if existing
                    .closed
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    debug!(user_id = %user_id, "替换已有连接");
                }
            }
            connections.insert(
                user_id,
                SseConnection {
                    connection_id,
                    sender,
                    created_at: Utc::now(),
                    closed: closed.clone(),
                },
            );
        }

        let registry = Arc::clone(self);
        let timeout = self.connection_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.finish(user_id, connection_id, DisconnectReason::TimedOut) {
                debug!(user_id = %user_id, "连接超时");
            }
        });

        SseHandle {
            user_id,
            connection_id,
            receiver,
            registry: Arc::clone(self),
        }
    }

    /// 注册并立即推送 connected 事件；带 last_event_id 时
    /// 尽力重放缓存中错过的事件。
    pub async fn subscribe(
        self: &Arc<Self>,
        user_id: Uuid,
        last_event_id: Option<Uuid>,
    ) -> SseHandle {
        let handle = self.register(user_id);

        self.push_to_connection(
            user_id,
            handle.connection_id,
            SseEvent::new(CONNECTED_EVENT_NAME, format!("user {} connected", user_id)),
        );

        if let Some(last_event_id) = last_event_id {
            match self.event_cache.events_after(user_id, last_event_id).await {
                Ok(missed) => {
                    for event in missed {
                        self.push_to_connection(user_id, handle.connection_id, event);
                    }
                }
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "重放缓存事件失败");
                }
            }
        }

        handle
    }

    /// 给本实例持有连接的用户发送事件
    ///
    /// 事件先进缓存（尽力而为），再写入通道；写失败说明客户端
    /// 已断开，立即注销而不是等待超时。返回是否完成本地投递。
    pub async fn send_to_user(&self, user_id: Uuid, event_name: &str, data: &str) -> bool {
        let event = SseEvent::new(event_name, data);

        if let Err(err) = self.event_cache.cache_event(user_id, &event).await {
            warn!(user_id = %user_id, error = %err, "缓存事件失败");
        }

        let target = {
            let connections = self.connections.read().unwrap();
            connections
                .get(&user_id)
                .map(|c| (c.connection_id, c.sender.clone()))
        };

        let Some((connection_id, sender)) = target else {
            return false;
        };

        if sender.send(event).is_err() {
            debug!(user_id = %user_id, "事件写入失败，客户端已断开");
            self.finish(user_id, connection_id, DisconnectReason::Errored);
            return false;
        }

        true
    }

    /// 跨实例广播到达后的本地再分发
    ///
    /// 本实例是一个过滤器：只投递本地持有连接的用户目的地，
    /// 其余消息静默丢弃（可能由别的实例投递，或根本无人在线）。
    pub async fn dispatch(&self, message: &OutboundMessage) -> bool {
        let Some(user_id) = parse_user_destination(&message.destination) else {
            return false;
        };
        if !self.has_local_connection(user_id) {
            return false;
        }
        self.send_to_user(user_id, &message.event_name, &message.payload)
            .await
    }

    /// 给所有本地连接发一轮心跳，返回仍然存活的连接数
    ///
    /// 写失败说明客户端已消失，立即注销，不等下一条真实事件
    /// 或连接超时才发现。
    pub fn send_heartbeats(&self) -> usize {
        let targets: Vec<(Uuid, Uuid, mpsc::UnboundedSender<SseEvent>)> = {
            let connections = self.connections.read().unwrap();
            connections
                .iter()
                .map(|(user_id, c)| (*user_id, c.connection_id, c.sender.clone()))
                .collect()
        };

        let mut alive = 0;
        for (user_id, connection_id, sender) in targets {
            if sender
                .send(SseEvent::new(HEARTBEAT_EVENT_NAME, "ping"))
                .is_ok()
            {
                alive += 1;
            } else {
                debug!(user_id = %user_id, "心跳写入失败，客户端已断开");
                self.finish(user_id, connection_id, DisconnectReason::Errored);
            }
        }
        alive
    }

    pub fn has_local_connection(&self, user_id: Uuid) -> bool {
        self.connections.read().unwrap().contains_key(&user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn connection_created_at(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.connections
            .read()
            .unwrap()
            .get(&user_id)
            .map(|c| c.created_at)
    }

    /// 唯一的终态转换入口
    ///
    /// compare_exchange 保证三个回调（完成/超时/错误）中只有第一个
    /// 生效；connection_id 比对防止迟到的回调误删用户的新连接。
    fn finish(&self, user_id: Uuid, connection_id: Uuid, reason: DisconnectReason) -> bool {
        let mut connections = self.connections.write().unwrap();
        let Some(connection) = connections.get(&user_id) else {
            return false;
        };
        if connection.connection_id != connection_id {
            return false;
        }
        if connection
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        connections.remove(&user_id);
        debug!(user_id = %user_id, reason = ?reason, "连接已注销");
        true
    }

    /// 直接写入指定连接，不经过事件缓存（重放与同步事件用）
    fn push_to_connection(&self, user_id: Uuid, connection_id: Uuid, event: SseEvent) {
        let sender = {
            let connections = self.connections.read().unwrap();
            match connections.get(&user_id) {
                Some(c) if c.connection_id == connection_id => Some(c.sender.clone()),
                _ => None,
            }
        };
        if let Some(sender) = sender {
            if sender.send(event).is_err() {
                self.finish(user_id, connection_id, DisconnectReason::Errored);
            }
        }
    }
}

#[async_trait]
impl OutboundDispatcher for SseRegistry {
    async fn dispatch(&self, message: &OutboundMessage) -> bool {
        SseRegistry::dispatch(self, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> Arc<InMemoryEventCache> {
        Arc::new(InMemoryEventCache::new(100, Duration::from_secs(600)))
    }

    fn registry() -> Arc<SseRegistry> {
        Arc::new(SseRegistry::new(cache(), Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn register_then_send_delivers_event() {
        let registry = registry();
        let user_id = Uuid::new_v4();
        let mut handle = registry.register(user_id);

        assert!(registry.send_to_user(user_id, "notifications", r#"{"n":1}"#).await);

        let event = handle.recv().await.unwrap();
        assert_eq!(event.name, "notifications");
        assert_eq!(event.data, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn send_to_unknown_user_is_not_delivered() {
        let registry = registry();
        assert!(!registry.send_to_user(Uuid::new_v4(), "notifications", "{}").await);
    }

    #[tokio::test]
    async fn dropping_handle_deregisters_exactly_once() {
        let registry = registry();
        let user_id = Uuid::new_v4();
        let handle = registry.register(user_id);
        assert!(registry.has_local_connection(user_id));

        // complete 和 drop 竞争，只能有一次生效
        handle.complete();
        drop(handle);

        assert!(!registry.has_local_connection(user_id));
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_deregisters_immediately() {
        let registry = registry();
        let user_id = Uuid::new_v4();
        let handle = registry.register(user_id);

        // 接收端关闭，模拟客户端消失；句柄仍在作用域内，
        // 注销必须由写失败触发而不是超时
        let mut handle = handle;
        handle.receiver.close();

        assert!(!registry.send_to_user(user_id, "notifications", "{}").await);
        assert!(!registry.has_local_connection(user_id));
    }

    #[tokio::test]
    async fn reregister_replaces_previous_connection() {
        let registry = registry();
        let user_id = Uuid::new_v4();

        let _first = registry.register(user_id);
        let mut second = registry.register(user_id);
        assert_eq!(registry.connection_count(), 1);

        assert!(registry.send_to_user(user_id, "notifications", "x").await);
        assert_eq!(second.recv().await.unwrap().data, "x");

        // 旧句柄 drop 时其终态已被置位，不得移除新连接
        drop(_first);
        assert!(registry.has_local_connection(user_id));
    }

    #[tokio::test]
    async fn connection_times_out_as_normal_termination() {
        let registry = Arc::new(SseRegistry::new(cache(), Duration::from_millis(20)));
        let user_id = Uuid::new_v4();
        let _handle = registry.register(user_id);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!registry.has_local_connection(user_id));
    }

    #[tokio::test]
    async fn subscribe_emits_connected_event_first() {
        let registry = registry();
        let mut handle = registry.subscribe(Uuid::new_v4(), None).await;

        let first = handle.recv().await.unwrap();
        assert_eq!(first.name, CONNECTED_EVENT_NAME);
    }

    #[tokio::test]
    async fn subscribe_with_last_event_id_replays_missed_events() {
        let registry = registry();
        let user_id = Uuid::new_v4();

        // 第一次连接期间收到三条事件
        let mut handle = registry.subscribe(user_id, None).await;
        let _connected = handle.recv().await.unwrap();
        registry.send_to_user(user_id, "notifications", "e1").await;
        registry.send_to_user(user_id, "notifications", "e2").await;
        let seen = handle.recv().await.unwrap();
        drop(handle);

        registry.send_to_user(user_id, "notifications", "e3").await;

        // 重连时带上最后看到的事件 id
        let mut reconnected = registry.subscribe(user_id, Some(seen.id)).await;
        let connected = reconnected.recv().await.unwrap();
        assert_eq!(connected.name, CONNECTED_EVENT_NAME);

        let replayed: Vec<String> = [
            reconnected.recv().await.unwrap(),
            reconnected.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.data.clone())
        .collect();
        assert_eq!(replayed, vec!["e2", "e3"]);
    }

    #[tokio::test]
    async fn dispatch_filters_by_local_registration() {
        // 两个注册表模拟两个实例
        let instance1 = registry();
        let instance2 = registry();
        let user_id = Uuid::new_v4();

        let mut handle = instance1.register(user_id);

        let message = OutboundMessage::to_user(user_id, "notifications", "hello");
        assert!(instance1.dispatch(&message).await);
        assert!(!instance2.dispatch(&message).await);

        assert_eq!(handle.recv().await.unwrap().data, "hello");
    }

    #[tokio::test]
    async fn dispatch_ignores_non_user_destinations() {
        let registry = registry();
        let message = OutboundMessage::to_watch_channel(Uuid::new_v4(), "watch", "{}");
        assert!(!registry.dispatch(&message).await);
    }

    #[tokio::test]
    async fn event_ids_are_time_ordered() {
        let first = SseEvent::new("a", "1");
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = SseEvent::new("a", "2");
        assert!(second.id > first.id);
        assert!(
            SseEvent::timestamp_millis(&second.id) >= SseEvent::timestamp_millis(&first.id)
        );
    }

    #[tokio::test]
    async fn heartbeat_deregisters_dead_connections() {
        let registry = registry();
        let live_user = Uuid::new_v4();
        let dead_user = Uuid::new_v4();

        let mut live = registry.register(live_user);
        let mut dead = registry.register(dead_user);
        dead.receiver.close();

        assert_eq!(registry.send_heartbeats(), 1);
        assert!(registry.has_local_connection(live_user));
        assert!(!registry.has_local_connection(dead_user));

        let ping = live.recv().await.unwrap();
        assert_eq!(ping.name, HEARTBEAT_EVENT_NAME);
    }

    #[tokio::test]
    async fn heartbeat_events_are_not_cached_for_replay() {
        let registry = registry();
        let user_id = Uuid::new_v4();
        let _handle = registry.register(user_id);

        registry.send_heartbeats();

        let cached = registry
            .event_cache
            .events_after(user_id, Uuid::nil())
            .await
            .unwrap();
        assert!(cached.is_empty());
    }

    #[tokio::test]
    async fn in_memory_cache_trims_to_max_size() {
        let cache = InMemoryEventCache::new(2, Duration::from_secs(600));
        let user_id = Uuid::new_v4();

        let e1 = SseEvent::new("n", "1");
        let e2 = SseEvent::new("n", "2");
        let e3 = SseEvent::new("n", "3");
        cache.cache_event(user_id, &e1).await.unwrap();
        cache.cache_event(user_id, &e2).await.unwrap();
        cache.cache_event(user_id, &e3).await.unwrap();

        let all = cache.events_after(user_id, Uuid::nil()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].data, "2");
        assert_eq!(all[1].data, "3");
    }

    #[tokio::test]
    async fn in_memory_cache_evicts_expired_user_entries() {
        let cache = InMemoryEventCache::new(2, Duration::from_millis(20));

        // 一批用户各写入一条后沉寂
        let stale_users: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        for user_id in &stale_users {
            cache
                .cache_event(*user_id, &SseEvent::new("n", "old"))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        // 过期键读不到
        let replayed = cache
            .events_after(stale_users[0], Uuid::nil())
            .await
            .unwrap();
        assert!(replayed.is_empty());

        // 下一次写入清扫全部过期键，键数不随沉寂用户无限增长
        let active = Uuid::new_v4();
        cache
            .cache_event(active, &SseEvent::new("n", "new"))
            .await
            .unwrap();
        assert_eq!(cache.events.read().await.len(), 1);
    }
}
