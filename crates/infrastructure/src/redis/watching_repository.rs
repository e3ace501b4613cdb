//! 观影会话的 Redis 存储
//!
//! 两个键位：每观看者一个 JSON 字符串键（查当前会话），每内容一个
//! 有序集合（数观看人数），两者都带 TTL，崩溃残留的会话会自然过期。

use crate::redis::{map_redis_err, RedisError, RedisResult};
use async_trait::async_trait;
use config::WatchingConfig;
use domain::repositories::WatchingSessionRepository;
use domain::{RepositoryResult, WatchingSession};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;
use uuid::Uuid;

const WATCHER_KEY_PREFIX: &str = "watching:session:";
const CONTENT_KEY_PREFIX: &str = "watching:content:";

pub struct RedisWatchingSessionRepository {
    connection: ConnectionManager,
    ttl_secs: i64,
}

impl RedisWatchingSessionRepository {
    pub async fn new(url: &str, config: &WatchingConfig) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        let connection =
            client
                .get_connection_manager()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("连接 Redis 失败: {}", e),
                })?;

        info!(ttl_secs = config.session_ttl_secs, "观影会话存储创建成功");

        Ok(Self {
            connection,
            ttl_secs: config.session_ttl_secs as i64,
        })
    }

    fn watcher_key(watcher_id: Uuid) -> String {
        format!("{}{}", WATCHER_KEY_PREFIX, watcher_id)
    }

    fn content_key(content_id: Uuid) -> String {
        format!("{}{}", CONTENT_KEY_PREFIX, content_id)
    }
}

#[async_trait]
impl WatchingSessionRepository for RedisWatchingSessionRepository {
    async fn save(&self, session: &WatchingSession) -> RepositoryResult<()> {
        let payload = serde_json::to_string(session)
            .map_err(|e| domain::RepositoryError::serialization(e.to_string()))?;

        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(
                Self::watcher_key(session.watcher.id),
                payload,
                self.ttl_secs as u64,
            )
            .await
            .map_err(map_redis_err)?;

        let content_key = Self::content_key(session.content.id);
        let _: () = conn
            .zadd(
                &content_key,
                session.watcher.id.to_string(),
                session.created_at.timestamp_millis(),
            )
            .await
            .map_err(map_redis_err)?;
        let _: () = conn
            .expire(&content_key, self.ttl_secs)
            .await
            .map_err(map_redis_err)?;

        Ok(())
    }

    async fn find_by_watcher_id(
        &self,
        watcher_id: Uuid,
    ) -> RepositoryResult<Option<WatchingSession>> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn
            .get(Self::watcher_key(watcher_id))
            .await
            .map_err(map_redis_err)?;

        match payload {
            Some(payload) => {
                let session = serde_json::from_str(&payload)
                    .map_err(|e| domain::RepositoryError::serialization(e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, session: &WatchingSession) -> RepositoryResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(Self::watcher_key(session.watcher.id))
            .await
            .map_err(map_redis_err)?;
        let _: () = conn
            .zrem(
                Self::content_key(session.content.id),
                session.watcher.id.to_string(),
            )
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn count_by_content_id(&self, content_id: Uuid) -> RepositoryResult<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = conn
            .zcard(Self::content_key(content_id))
            .await
            .map_err(map_redis_err)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{WatchedContent, Watcher};

    fn session() -> WatchingSession {
        WatchingSession::new(
            Watcher {
                id: Uuid::new_v4(),
                name: "A".to_string(),
                profile_image_path: None,
            },
            WatchedContent {
                id: Uuid::new_v4(),
                title: "movie".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_save_find_delete_roundtrip() {
        // 注意：这个测试需要运行 Redis 实例才能通过
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let repo = RedisWatchingSessionRepository::new(
                "redis://localhost:6379",
                &WatchingConfig {
                    session_ttl_secs: 60,
                },
            )
            .await
            .unwrap();

            let session = session();
            repo.save(&session).await.unwrap();

            let found = repo.find_by_watcher_id(session.watcher.id).await.unwrap();
            assert_eq!(found, Some(session.clone()));
            assert_eq!(repo.count_by_content_id(session.content.id).await.unwrap(), 1);

            repo.delete(&session).await.unwrap();
            assert!(repo.find_by_watcher_id(session.watcher.id).await.unwrap().is_none());
            assert_eq!(repo.count_by_content_id(session.content.id).await.unwrap(), 0);
        }
    }
}
