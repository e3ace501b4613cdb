//! 订阅者计数缓存
//!
//! 实时路径用原子 INCR/DECR，自减用 Lua 脚本保证下限为 0。
//! 权威值由对账任务周期性覆盖写。

use crate::redis::{map_redis_err, RedisError, RedisResult};
use async_trait::async_trait;
use domain::repositories::CachedCountRepository;
use domain::RepositoryResult;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::info;
use uuid::Uuid;

const COUNT_KEY_PREFIX: &str = "subscriber:count:";

// DECR 后为负说明计数已经漂移，立即归零
const FLOORED_DECR_SCRIPT: &str = r#"
local value = redis.call('DECR', KEYS[1])
if value < 0 then
    redis.call('SET', KEYS[1], 0)
    return 0
end
return value
"#;

pub struct RedisSubscriberCountCache {
    connection: ConnectionManager,
    floored_decr: Script,
}

impl RedisSubscriberCountCache {
    pub async fn new(url: &str) -> RedisResult<Self> {
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

        info!("订阅者计数缓存创建成功");

        Ok(Self {
            connection,
            floored_decr: Script::new(FLOORED_DECR_SCRIPT),
        })
    }

    fn key(id: Uuid) -> String {
        format!("{}{}", COUNT_KEY_PREFIX, id)
    }
}

#[async_trait]
impl CachedCountRepository for RedisSubscriberCountCache {
    async fn get_count(&self, id: Uuid) -> RepositoryResult<u64> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = conn.get(Self::key(id)).await.map_err(map_redis_err)?;
        Ok(count.unwrap_or(0))
    }

    async fn set_count(&self, id: Uuid, count: u64) -> RepositoryResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(Self::key(id), count).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn increment(&self, id: Uuid) -> RepositoryResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.incr(Self::key(id), 1).await.map_err(map_redis_err)?;
        Ok(())
    }

    async fn decrement(&self, id: Uuid) -> RepositoryResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = self
            .floored_decr
            .key(Self::key(id))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}
