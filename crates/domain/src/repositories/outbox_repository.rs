//! Outbox 仓储接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::RepositoryResult;
use crate::outbox::OutboxRecord;

/// Outbox 表的读写接口
///
/// 写入方是业务事务（本子系统之外），中继只做状态转移。
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// 查询可发布的记录：PENDING 且 retry_count < max_retry，
    /// 按 created_at 升序（稳定 FIFO，保证同聚合事件不乱序）。
    async fn find_pending(&self, max_retry: u32, limit: u32)
        -> RepositoryResult<Vec<OutboxRecord>>;

    /// 持久化状态转移（PUBLISHED/FAILED/retry_count）
    async fn update(&self, record: &OutboxRecord) -> RepositoryResult<()>;

    /// 删除 published_at 早于截止时间的 PUBLISHED 记录，返回删除条数。
    /// FAILED 记录永不删除。
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<u64>;
}
