//! Outbox 仓储实现
//!
//! 待发布查询按 created_at 升序（FIFO），只取重试次数未耗尽的
//! PENDING 记录。中继单实例轮询，不需要行级锁。

use crate::db::{map_sqlx_err, DbPool};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::repositories::OutboxRepository;
use domain::{OutboxRecord, OutboxStatus, RepositoryError, RepositoryResult};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

/// 数据库 outbox 模型
#[derive(Debug, Clone, FromRow)]
struct DbOutboxRecord {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    topic: String,
    payload: String,
    status: String,
    published_at: Option<DateTime<Utc>>,
    retry_count: i32,
    created_at: DateTime<Utc>,
}

fn parse_status(status: &str) -> Result<OutboxStatus, RepositoryError> {
    match status {
        "PENDING" => Ok(OutboxStatus::Pending),
        "PUBLISHED" => Ok(OutboxStatus::Published),
        "FAILED" => Ok(OutboxStatus::Failed),
        other => Err(RepositoryError::storage(format!(
            "未知的 outbox 状态: {}",
            other
        ))),
    }
}

impl TryFrom<DbOutboxRecord> for OutboxRecord {
    type Error = RepositoryError;

    fn try_from(value: DbOutboxRecord) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: value.id,
            aggregate_type: value.aggregate_type,
            aggregate_id: value.aggregate_id,
            event_type: value.event_type,
            topic: value.topic,
            payload: value.payload,
            status: parse_status(&value.status)?,
            published_at: value.published_at,
            retry_count: value.retry_count as u32,
            created_at: value.created_at,
        })
    }
}

pub struct PgOutboxRepository {
    pool: Arc<DbPool>,
}

impl PgOutboxRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn find_pending(&self, max_retry: u32, limit: u32) -> RepositoryResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, DbOutboxRecord>(
            r#"SELECT id, aggregate_type, aggregate_id, event_type, topic, payload,
                      status, published_at, retry_count, created_at
               FROM outbox_events
               WHERE status = 'PENDING' AND retry_count < $1
               ORDER BY created_at ASC
               LIMIT $2"#,
        )
        .bind(max_retry as i32)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }

    async fn update(&self, record: &OutboxRecord) -> RepositoryResult<()> {
        sqlx::query(
            r#"UPDATE outbox_events
               SET status = $2, published_at = $3, retry_count = $4
               WHERE id = $1"#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.published_at)
        .bind(record.retry_count as i32)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query(
            r#"DELETE FROM outbox_events
               WHERE status = 'PUBLISHED' AND published_at < $1"#,
        )
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}
