//! 死信处理
//!
//! 从死信消息的头部尽力提取失败元数据，构造 DeadLetterRecord 交给
//! 可插拔的告警发布器。无论告警是否成功，调用方都必须确认消息——
//! 毒消息绝不能堵死死信通道。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::DeadLetterRecord;
use thiserror::Error;
use tracing::{error, info};

/// 死信消息头约定（与下游重试框架一致）
pub const HEADER_ORIGINAL_TOPIC: &str = "kafka_dlt-original-topic";
pub const HEADER_EXCEPTION_MESSAGE: &str = "kafka_dlt-exception-message";
pub const HEADER_EXCEPTION_STACKTRACE: &str = "kafka_dlt-exception-stacktrace";

/// 与传输层解耦的死信消息视图，由消费者适配器构造
#[derive(Debug, Clone)]
pub struct DeadLetterMessage {
    pub key: Option<String>,
    pub payload: String,
    pub headers: HashMap<String, String>,
    pub offset: i64,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert publish failed: {0}")]
    Failed(String),
}

/// 告警发布接口
///
/// 默认实现写一条结构化日志；生产环境可以换成寻呼/工单。
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), AlertError>;
}

pub struct LogAlertPublisher;

#[async_trait]
impl AlertPublisher for LogAlertPublisher {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), AlertError> {
        error!(
            original_topic = %record.original_topic,
            message_key = record.message_key.as_deref().unwrap_or("-"),
            failure_reason = %record.failure_reason,
            failure_detail = %record.failure_detail,
            "[DLQ] 收到死信消息"
        );
        Ok(())
    }
}

pub struct DeadLetterProcessor {
    alerts: Arc<dyn AlertPublisher>,
}

impl DeadLetterProcessor {
    pub fn new(alerts: Arc<dyn AlertPublisher>) -> Self {
        Self { alerts }
    }

    /// 处理一条死信消息
    ///
    /// 永不失败：元数据缺失用占位值，告警失败只记日志。
    /// 调用方在本方法返回后无条件 ack。
    pub async fn handle_dead_letter(&self, message: DeadLetterMessage) {
        let record = DeadLetterRecord::new(
            message.headers.get(HEADER_ORIGINAL_TOPIC).cloned(),
            message.key.clone(),
            message.payload,
            message.headers.get(HEADER_EXCEPTION_MESSAGE).cloned(),
            message.headers.get(HEADER_EXCEPTION_STACKTRACE).cloned(),
        );

        if let Err(err) = self.alerts.publish(&record).await {
            error!(
                original_topic = %record.original_topic,
                error = %err,
                "[DLQ] 告警发布失败，消息仍会被确认"
            );
            return;
        }

        info!(
            original_topic = %record.original_topic,
            key = message.key.as_deref().unwrap_or("-"),
            offset = message.offset,
            "[DLQ] 死信处理完成"
        );
    }
}
