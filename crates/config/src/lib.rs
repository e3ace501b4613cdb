//! 统一配置中心
//!
//! 提供中继与实时推送子系统的全局配置，包括：
//! - 数据库连接
//! - Kafka 生产者/死信消费者
//! - Redis（会话存储、事件缓存、跨实例广播）
//! - Outbox 中继调度
//! - SSE 连接生命周期
//! - 对账任务

use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 数据库配置
    pub database: DatabaseConfig,
    /// Kafka 配置
    pub kafka: KafkaConfig,
    /// Redis 配置
    pub redis: RedisConfig,
    /// Outbox 中继配置
    pub outbox: OutboxConfig,
    /// SSE 连接配置
    pub sse: SseConfig,
    /// 观影会话配置
    pub watching: WatchingConfig,
    /// 对账任务配置
    pub reconcile: ReconcileConfig,
    /// 跨实例广播方式
    pub fanout_mode: FanoutMode,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Kafka 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Kafka 服务器地址列表
    pub brokers: Vec<String>,
    /// 死信主题名称
    pub dlq_topic: String,
    /// 死信消费者组ID
    pub dlq_consumer_group_id: String,
    /// 消息发送超时时间（毫秒）
    pub send_timeout_ms: u64,
    /// 确认模式（all, 1, 0）
    pub acks: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            dlq_topic: "dead-letter".to_string(),
            dlq_consumer_group_id: "relay-worker-dlq-group".to_string(),
            send_timeout_ms: 5000,
            acks: "all".to_string(),
        }
    }
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis 服务器地址
    pub url: String,
    /// 跨实例广播频道名称
    pub fanout_channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            fanout_channel: "notifications".to_string(),
        }
    }
}

/// Outbox 中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// 每次轮询的最大记录数
    pub batch_size: u32,
    /// 发布失败的最大重试次数，超过后记录转为 FAILED
    pub max_retry: u32,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// PUBLISHED 记录的保留天数
    pub retention_days: i64,
    /// 清理任务间隔（秒）
    pub cleanup_interval_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retry: 3,
            poll_interval_ms: 1000,
            retention_days: 7,
            cleanup_interval_secs: 24 * 60 * 60,
        }
    }
}

/// SSE 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// 连接最长存活时间（秒），到期视为正常超时
    pub connection_timeout_secs: u64,
    /// 心跳间隔（秒），写失败的连接立即注销
    pub heartbeat_interval_secs: u64,
    /// 事件缓存条目上限（每用户）
    pub event_cache_max_size: usize,
    /// 事件缓存 TTL（秒）
    pub event_cache_ttl_secs: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 60 * 60,
            heartbeat_interval_secs: 30,
            event_cache_max_size: 100,
            event_cache_ttl_secs: 10 * 60,
        }
    }
}

/// 观影会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchingConfig {
    /// 会话条目 TTL（秒）
    ///
    /// 断开事件丢失时唯一的兜底清理手段，必须足够短。
    pub session_ttl_secs: u64,
}

impl Default for WatchingConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 6 * 60 * 60,
        }
    }
}

/// 对账任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// keyset 分页的每批大小
    pub chunk_size: u32,
    /// 任务间隔（秒）
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            interval_secs: 24 * 60 * 60,
        }
    }
}

/// 跨实例广播方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutMode {
    /// 单实例部署：进程内广播
    Local,
    /// 多实例部署：经 Redis Pub/Sub 广播
    Redis,
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl AppConfig {
    /// 从环境变量加载配置
    ///
    /// DATABASE_URL 缺失时 panic，避免生产环境落到不安全默认值；
    /// 其余配置项缺失时使用默认值。
    pub fn from_env() -> Self {
        Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .expect("DATABASE_URL environment variable is required"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", 5),
            },
            kafka: KafkaConfig {
                brokers: env::var("KAFKA_BROKERS")
                    .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_else(|_| KafkaConfig::default().brokers),
                dlq_topic: env_or("KAFKA_DLQ_TOPIC", KafkaConfig::default().dlq_topic),
                dlq_consumer_group_id: env_or(
                    "KAFKA_DLQ_GROUP_ID",
                    KafkaConfig::default().dlq_consumer_group_id,
                ),
                send_timeout_ms: parse_env("KAFKA_SEND_TIMEOUT_MS", 5000),
                acks: env_or("KAFKA_ACKS", "all".to_string()),
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", RedisConfig::default().url),
                fanout_channel: env_or(
                    "REDIS_FANOUT_CHANNEL",
                    RedisConfig::default().fanout_channel,
                ),
            },
            outbox: OutboxConfig {
                batch_size: parse_env("OUTBOX_BATCH_SIZE", 100),
                max_retry: parse_env("OUTBOX_MAX_RETRY", 3),
                poll_interval_ms: parse_env("OUTBOX_POLL_INTERVAL_MS", 1000),
                retention_days: parse_env("OUTBOX_RETENTION_DAYS", 7),
                cleanup_interval_secs: parse_env("OUTBOX_CLEANUP_INTERVAL_SECS", 24 * 60 * 60),
            },
            sse: SseConfig {
                connection_timeout_secs: parse_env("SSE_CONNECTION_TIMEOUT_SECS", 60 * 60),
                heartbeat_interval_secs: parse_env("SSE_HEARTBEAT_INTERVAL_SECS", 30),
                event_cache_max_size: parse_env("SSE_EVENT_CACHE_MAX_SIZE", 100),
                event_cache_ttl_secs: parse_env("SSE_EVENT_CACHE_TTL_SECS", 10 * 60),
            },
            watching: WatchingConfig {
                session_ttl_secs: parse_env("WATCHING_SESSION_TTL_SECS", 6 * 60 * 60),
            },
            reconcile: ReconcileConfig {
                chunk_size: parse_env("RECONCILE_CHUNK_SIZE", 500),
                interval_secs: parse_env("RECONCILE_INTERVAL_SECS", 24 * 60 * 60),
            },
            fanout_mode: match env::var("FANOUT_MODE").as_deref() {
                Ok("local") => FanoutMode::Local,
                _ => FanoutMode::Redis,
            },
        }
    }

    /// 验证配置有效性，只在启动时调用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "outbox.batch_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.outbox.max_retry == 0 {
            return Err(ConfigError::InvalidValue {
                key: "outbox.max_retry".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "kafka.brokers".to_string(),
                message: "at least one broker is required".to_string(),
            });
        }
        if self.reconcile.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reconcile.chunk_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let outbox = OutboxConfig::default();
        assert_eq!(outbox.batch_size, 100);
        assert_eq!(outbox.max_retry, 3);
        assert_eq!(outbox.retention_days, 7);

        let sse = SseConfig::default();
        assert_eq!(sse.connection_timeout_secs, 3600);
        assert_eq!(sse.heartbeat_interval_secs, 30);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let config = AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                max_connections: 5,
            },
            kafka: KafkaConfig::default(),
            redis: RedisConfig::default(),
            outbox: OutboxConfig {
                batch_size: 0,
                ..OutboxConfig::default()
            },
            sse: SseConfig::default(),
            watching: WatchingConfig::default(),
            reconcile: ReconcileConfig::default(),
            fanout_mode: FanoutMode::Local,
        };
        assert!(config.validate().is_err());
    }
}
