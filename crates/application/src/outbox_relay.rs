//! Outbox 中继
//!
//! 周期性轮询 outbox 表，把 PENDING 记录发布到消息代理并推进状态。
//! 单条记录的失败绝不影响同批其余记录；代理整体不可用时，
//! 下一个 tick 自动恢复，每条记录的重试次数由 max_retry 封顶。

use std::sync::Arc;

use chrono::{Duration, Utc};
use config::OutboxConfig;
use domain::repositories::OutboxRepository;
use tracing::{debug, error, warn};

use crate::publisher::EventPublisher;

pub struct OutboxRelay {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
}

impl OutboxRelay {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
        }
    }

    /// 发布一批 PENDING 记录，返回成功发布的条数
    ///
    /// 每条记录独立结算：发布成功 → PUBLISHED；失败 → retry_count + 1，
    /// 达到 max_retry 后 → FAILED（永久放弃，仅留日志，等待人工处理）。
    pub async fn publish_pending(&self) -> u32 {
        let pending = match self
            .repository
            .find_pending(self.config.max_retry, self.config.batch_size)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "查询待发布 outbox 记录失败");
                return 0;
            }
        };

        if pending.is_empty() {
            return 0;
        }

        let mut published = 0u32;

        for mut record in pending {
            match self
                .publisher
                .publish(&record.topic, &record.aggregate_id, &record.payload)
                .await
            {
                Ok(()) => {
                    record.mark_published(Utc::now());
                    published += 1;
                    debug!(
                        event_id = %record.id,
                        topic = %record.topic,
                        aggregate_id = %record.aggregate_id,
                        "事件发布成功"
                    );
                }
                Err(err) => {
                    warn!(
                        event_id = %record.id,
                        topic = %record.topic,
                        retry_count = record.retry_count,
                        error = %err,
                        "事件发布失败"
                    );
                    record.increment_retry();

                    if record.retry_count >= self.config.max_retry {
                        record.mark_failed();
                        error!(
                            event_id = %record.id,
                            max_retry = self.config.max_retry,
                            "重试次数耗尽，事件转为 FAILED，不再自动重试"
                        );
                    }
                }
            }

            // 状态落库失败只记日志，不中断批次；
            // 未保存的转移会在下一个 tick 重做（发布是至少一次语义）。
            if let Err(err) = self.repository.update(&record).await {
                error!(event_id = %record.id, error = %err, "保存 outbox 状态失败");
            }
        }

        published
    }

    /// 清理过期的 PUBLISHED 记录，返回删除条数
    ///
    /// FAILED 记录是留给运维的证据，永不自动删除。
    pub async fn cleanup_old_events(&self) -> u64 {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);

        match self.repository.delete_published_before(cutoff).await {
            Ok(deleted) => {
                tracing::info!(deleted_count = deleted, "清理过期 outbox 记录完成");
                deleted
            }
            Err(err) => {
                error!(error = %err, "清理过期 outbox 记录失败");
                0
            }
        }
    }
}
