//! Outbox 事件记录
//!
//! 业务事务提交时写入同一事务内的 outbox 表，由中继调度器异步发布到
//! Kafka。状态机：PENDING → PUBLISHED / FAILED，两个终态不可再变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};

pub const AGGREGATE_TYPE_MAX_LENGTH: usize = 50;
pub const AGGREGATE_ID_MAX_LENGTH: usize = 36;
pub const EVENT_TYPE_MAX_LENGTH: usize = 100;
pub const TOPIC_MAX_LENGTH: usize = 100;

/// Outbox 记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::Failed)
    }
}

/// Outbox 事件记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// 创建新的 PENDING 记录
    ///
    /// 唯一的构造入口，对所有字段做长度/非空校验。
    /// 这是本子系统中仅有的向调用方返回错误的位置。
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<String>,
    ) -> DomainResult<Self> {
        let aggregate_type = aggregate_type.into();
        let aggregate_id = aggregate_id.into();
        let event_type = event_type.into();
        let topic = topic.into();
        let payload = payload.into();

        validate_field("aggregate_type", &aggregate_type, AGGREGATE_TYPE_MAX_LENGTH)?;
        validate_field("aggregate_id", &aggregate_id, AGGREGATE_ID_MAX_LENGTH)?;
        validate_field("event_type", &event_type, EVENT_TYPE_MAX_LENGTH)?;
        validate_field("topic", &topic, TOPIC_MAX_LENGTH)?;
        if payload.trim().is_empty() {
            return Err(DomainError::invalid_outbox_data("payload", "不能为空"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_type,
            aggregate_id,
            event_type,
            topic,
            payload,
            status: OutboxStatus::Pending,
            published_at: None,
            retry_count: 0,
            created_at: Utc::now(),
        })
    }

    /// 标记为已发布
    ///
    /// 仅 PENDING 记录会发生转换，终态记录保持不变。
    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
    }

    /// 标记为永久失败
    pub fn mark_failed(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = OutboxStatus::Failed;
    }

    /// 发布失败后递增重试计数，仅在 PENDING 状态下有效
    pub fn increment_retry(&mut self) {
        if self.status == OutboxStatus::Pending {
            self.retry_count += 1;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutboxStatus::Failed
    }
}

fn validate_field(field: &str, value: &str, max_length: usize) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_outbox_data(field, "不能为空"));
    }
    if value.chars().count() > max_length {
        return Err(DomainError::invalid_outbox_data(
            field,
            format!("长度不能超过 {} 个字符", max_length),
        ));
    }
    Ok(())
}
