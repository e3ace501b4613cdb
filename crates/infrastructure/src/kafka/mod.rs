//! Kafka 模块
//!
//! 提供事件发布和死信队列消费能力。

pub mod dlq_consumer;
pub mod error;
pub mod producer;

pub use dlq_consumer::*;
pub use error::*;
pub use producer::*;
