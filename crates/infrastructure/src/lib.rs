//! 基础设施层
//!
//! Kafka 生产者/死信消费者、Redis 广播与存储、PostgreSQL 仓储的具体实现。

pub mod db;
pub mod kafka;
pub mod redis;

pub use db::{create_pool, DbPool, PgOutboxRepository, PgSubscriberCountSource};
pub use kafka::{DlqConsumer, KafkaError, KafkaEventPublisher, KafkaResult};
pub use redis::{
    FanoutListener, RedisError, RedisEventCache, RedisFanoutBroadcaster, RedisResult,
    RedisSubscriberCountCache, RedisWatchingSessionRepository,
};
