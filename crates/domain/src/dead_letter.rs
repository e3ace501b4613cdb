//! 死信记录
//!
//! 下游消费者耗尽传输层重试后，消息被路由到死信主题。
//! 死信消费者从消息头里尽力提取失败元数据，缺失时一律用占位值，
//! 绝不因为元数据不完整而报错。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_PLACEHOLDER: &str = "unknown";

/// 一条进入死信通道的消息及其失败上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// 消息原本发往的主题
    pub original_topic: String,
    /// 消息键（分区键），可能缺失
    pub message_key: Option<String>,
    /// 原始消息体
    pub payload: String,
    /// 失败原因（异常消息）
    pub failure_reason: String,
    /// 失败详情（堆栈等），尽力而为
    pub failure_detail: String,
    pub received_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        original_topic: Option<String>,
        message_key: Option<String>,
        payload: String,
        failure_reason: Option<String>,
        failure_detail: Option<String>,
    ) -> Self {
        Self {
            original_topic: original_topic.unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string()),
            message_key,
            payload,
            failure_reason: failure_reason.unwrap_or_else(|| UNKNOWN_PLACEHOLDER.to_string()),
            failure_detail: failure_detail.unwrap_or_default(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_falls_back_to_placeholders() {
        let record = DeadLetterRecord::new(None, None, "{}".to_string(), None, None);
        assert_eq!(record.original_topic, UNKNOWN_PLACEHOLDER);
        assert_eq!(record.failure_reason, UNKNOWN_PLACEHOLDER);
        assert_eq!(record.failure_detail, "");
        assert!(record.message_key.is_none());
    }

    #[test]
    fn present_metadata_is_kept() {
        let record = DeadLetterRecord::new(
            Some("review-created".to_string()),
            Some("agg-1".to_string()),
            "{}".to_string(),
            Some("deserialization failed".to_string()),
            Some("at line 1".to_string()),
        );
        assert_eq!(record.original_topic, "review-created");
        assert_eq!(record.failure_reason, "deserialization failed");
        assert_eq!(record.failure_detail, "at line 1");
    }
}
