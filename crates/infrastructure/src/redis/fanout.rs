//! 跨实例广播（Redis Pub/Sub）
//!
//! 广播者把出站消息发布到共享频道，每个实例的监听者收到后交给
//! 本地连接注册表分发。注册表没有对应连接的消息会被静默忽略，
//! 这正是多实例下的路由手段：只有持有该用户连接的实例会真正下发。

use crate::redis::{RedisError, RedisResult};
use application::{BroadcastError, FanoutBroadcaster, OutboundDispatcher, OutboundMessage};
use async_trait::async_trait;
use config::RedisConfig;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Redis 广播者
///
/// ConnectionManager 自带断线重连，发布失败由调用方决定是否重试
/// （推送是尽力而为语义，上层通常只记日志）。
pub struct RedisFanoutBroadcaster {
    connection: ConnectionManager,
    channel: String,
}

impl RedisFanoutBroadcaster {
    /// 创建新的 Redis 广播者
    pub async fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        let connection =
            client
                .get_connection_manager()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("连接 Redis 失败: {}", e),
                })?;

        info!("Redis 广播者创建成功，频道: {}", config.fanout_channel);

        Ok(Self {
            connection,
            channel: config.fanout_channel.clone(),
        })
    }
}

#[async_trait]
impl FanoutBroadcaster for RedisFanoutBroadcaster {
    async fn broadcast(&self, message: OutboundMessage) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| BroadcastError::failed(format!("序列化出站消息失败: {}", e)))?;

        let mut connection = self.connection.clone();
        let subscriber_count: u32 = connection
            .publish(&self.channel, payload)
            .await
            .map_err(|e| BroadcastError::failed(format!("发布到 Redis 频道失败: {}", e)))?;

        debug!(
            destination = %message.destination,
            subscriber_count = subscriber_count,
            "出站消息已广播"
        );
        Ok(())
    }
}

/// 广播频道监听者
///
/// 每个实例启动一个，收到的消息交给本地分发器。分发器通常是
/// SseRegistry，或把注册表和观影频道分发器串起来的 DispatcherChain。
pub struct FanoutListener {
    client: Client,
    channel: String,
    dispatcher: Arc<dyn OutboundDispatcher>,
    shutdown_signal: Arc<AtomicBool>,
}

impl FanoutListener {
    pub fn new(config: &RedisConfig, dispatcher: Arc<dyn OutboundDispatcher>) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;

        Ok(Self {
            client,
            channel: config.fanout_channel.clone(),
            dispatcher,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 订阅广播频道并持续分发，直到关闭信号或重连耗尽
    pub async fn run(&self) -> RedisResult<()> {
        let mut retry_count = 0;
        const MAX_RETRIES: u32 = 5;

        while !self.shutdown_signal.load(Ordering::Relaxed) {
            match self.subscribe_and_dispatch().await {
                Ok(()) => {
                    retry_count = 0;
                    info!("广播监听正常退出");
                }
                Err(e) => {
                    error!("广播监听错误: {}", e);
                    retry_count += 1;

                    if retry_count >= MAX_RETRIES {
                        error!("连接失败，已达最大重试次数");
                        return Err(e);
                    }

                    let delay = Duration::from_millis(500 * (2_u64.pow(retry_count - 1)));
                    sleep(delay).await;
                }
            }
        }

        info!("广播监听已停止");
        Ok(())
    }

    async fn subscribe_and_dispatch(&self) -> RedisResult<()> {
        let mut pubsub =
            self.client
                .get_async_pubsub()
                .await
                .map_err(|e| RedisError::ConnectionError {
                    message: format!("获取 PubSub 连接失败: {}", e),
                })?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| RedisError::SubscribeError {
                message: format!("订阅频道 {} 失败: {}", self.channel, e),
            })?;

        info!("已订阅广播频道: {}", self.channel);

        loop {
            if self.shutdown_signal.load(Ordering::Relaxed) {
                break;
            }

            // 用超时避免无限阻塞，周期性检查关闭信号
            match tokio::time::timeout(Duration::from_millis(1000), async {
                pubsub.on_message().next().await
            })
            .await
            {
                Ok(Some(msg)) => {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("获取消息负载失败: {}", e);
                            continue;
                        }
                    };

                    // 损坏的消息只记日志，不中断监听
                    let message: OutboundMessage = match serde_json::from_str(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(error = %e, "反序列化出站消息失败，丢弃");
                            continue;
                        }
                    };

                    let delivered = self.dispatcher.dispatch(&message).await;
                    debug!(
                        destination = %message.destination,
                        delivered = delivered,
                        "广播消息分发完成"
                    );
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// 优雅关闭监听者
    pub fn shutdown(&self) {
        info!("开始关闭广播监听");
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown_signal.load(Ordering::Relaxed)
    }
}

impl Drop for FanoutListener {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{InMemoryEventCache, SseRegistry};
    use uuid::Uuid;

    fn create_test_config() -> RedisConfig {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            fanout_channel: "test-notifications".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcaster_creation() {
        let config = create_test_config();

        // 注意：这个测试需要运行 Redis 实例才能通过
        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let broadcaster = RedisFanoutBroadcaster::new(&config).await;
            assert!(broadcaster.is_ok());
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_local_registry() {
        let config = create_test_config();

        if std::env::var("REDIS_INTEGRATION_TEST").is_ok() {
            let registry = Arc::new(SseRegistry::new(
                Arc::new(InMemoryEventCache::new(100, Duration::from_secs(600))),
                Duration::from_secs(60),
            ));
            let listener =
                FanoutListener::new(&config, registry.clone() as Arc<dyn OutboundDispatcher>)
                    .unwrap();
            let listener = Arc::new(listener);
            let listener_task = {
                let listener = listener.clone();
                tokio::spawn(async move { listener.run().await })
            };

            // 等待订阅建立
            sleep(Duration::from_millis(200)).await;

            let user_id = Uuid::new_v4();
            let mut handle = registry.register(user_id);

            let broadcaster = RedisFanoutBroadcaster::new(&config).await.unwrap();
            broadcaster
                .broadcast(OutboundMessage::to_user(user_id, "notification", "{}"))
                .await
                .unwrap();

            let received =
                tokio::time::timeout(Duration::from_secs(2), handle.recv()).await;
            assert!(received.is_ok());

            listener.shutdown();
            let _ = listener_task.await;
        }
    }
}
