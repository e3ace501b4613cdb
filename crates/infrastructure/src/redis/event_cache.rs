//! Redis 事件缓存
//!
//! 每用户一个有序集合，score 取事件 id（UUIDv7）高位的毫秒时间戳，
//! 成员是事件 JSON。写入后按条数裁剪并续 TTL，保证缓存有界。

use crate::redis::{map_redis_err, RedisError, RedisResult};
use application::{EventCache, SseEvent};
use async_trait::async_trait;
use config::SseConfig;
use domain::RepositoryResult;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;
use uuid::Uuid;

const EVENT_CACHE_KEY_PREFIX: &str = "sse:events:";

pub struct RedisEventCache {
    connection: ConnectionManager,
    max_size: usize,
    ttl_secs: i64,
}

impl RedisEventCache {
    pub async fn new(url: &str, config: &SseConfig) -> RedisResult<Self> {
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

        info!(
            max_size = config.event_cache_max_size,
            ttl_secs = config.event_cache_ttl_secs,
            "Redis 事件缓存创建成功"
        );

        Ok(Self {
            connection,
            max_size: config.event_cache_max_size,
            ttl_secs: config.event_cache_ttl_secs as i64,
        })
    }

    fn key(user_id: Uuid) -> String {
        format!("{}{}", EVENT_CACHE_KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl EventCache for RedisEventCache {
    async fn cache_event(&self, user_id: Uuid, event: &SseEvent) -> RepositoryResult<()> {
        let key = Self::key(user_id);
        let member = serde_json::to_string(event)
            .map_err(|e| domain::RepositoryError::serialization(e.to_string()))?;
        let score = SseEvent::timestamp_millis(&event.id) as f64;

        let mut conn = self.connection.clone();
        let _: () = conn
            .zadd(&key, member, score)
            .await
            .map_err(map_redis_err)?;
        // 只保留最新 max_size 条
        let _: () = conn
            .zremrangebyrank(&key, 0, -(self.max_size as isize) - 1)
            .await
            .map_err(map_redis_err)?;
        let _: () = conn.expire(&key, self.ttl_secs).await.map_err(map_redis_err)?;

        Ok(())
    }

    async fn events_after(
        &self,
        user_id: Uuid,
        last_event_id: Uuid,
    ) -> RepositoryResult<Vec<SseEvent>> {
        let key = Self::key(user_id);
        let min_score = SseEvent::timestamp_millis(&last_event_id) as f64;

        let mut conn = self.connection.clone();
        let members: Vec<String> = conn
            .zrangebyscore(&key, min_score, "+inf")
            .await
            .map_err(map_redis_err)?;

        // 同一毫秒内的事件 score 相同，用 id 再过滤一次
        let mut events: Vec<SseEvent> = members
            .iter()
            .filter_map(|m| serde_json::from_str::<SseEvent>(m).ok())
            .filter(|e| e.id > last_event_id)
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> SseConfig {
        SseConfig {
            connection_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            event_cache_max_size: 5,
            event_cache_ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_cache_and_replay() {
        // 注意：这个测试需要运行 Redis 实例才能通过
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let cache = RedisEventCache::new("redis://localhost:6379", &create_test_config())
                .await
                .unwrap();
            let user_id = Uuid::new_v4();

            let first = SseEvent::new("notification", "1");
            let second = SseEvent::new("notification", "2");
            cache.cache_event(user_id, &first).await.unwrap();
            cache.cache_event(user_id, &second).await.unwrap();

            let replayed = cache.events_after(user_id, first.id).await.unwrap();
            assert_eq!(replayed, vec![second]);
        }
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let cache = RedisEventCache::new("redis://localhost:6379", &create_test_config())
                .await
                .unwrap();
            let user_id = Uuid::new_v4();

            let oldest = SseEvent::new("notification", "0");
            cache.cache_event(user_id, &oldest).await.unwrap();
            for i in 0..5 {
                let event = SseEvent::new("notification", i.to_string());
                cache.cache_event(user_id, &event).await.unwrap();
            }

            // 超出上限后最旧的事件被裁剪
            let replayed = cache.events_after(user_id, Uuid::nil()).await.unwrap();
            assert_eq!(replayed.len(), 5);
            assert!(!replayed.contains(&oldest));
        }
    }
}
