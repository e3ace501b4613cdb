//! 订阅者计数的权威来源
//!
//! 对账任务从这里读取全量歌单 id（keyset 分页）和每个歌单的
//! 真实订阅人数。

use crate::db::{map_sqlx_err, DbPool};
use async_trait::async_trait;
use domain::repositories::DurableCountSource;
use domain::RepositoryResult;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

pub struct PgSubscriberCountSource {
    pool: Arc<DbPool>,
}

impl PgSubscriberCountSource {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableCountSource for PgSubscriberCountSource {
    async fn find_ids_after(&self, after: Uuid, limit: u32) -> RepositoryResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"SELECT id FROM playlists
               WHERE id > $1
               ORDER BY id ASC
               LIMIT $2"#,
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.iter().map(|row| row.get::<Uuid, _>("id")).collect())
    }

    async fn count(&self, id: Uuid) -> RepositoryResult<u64> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS count FROM playlist_subscribers WHERE playlist_id = $1"#,
        )
        .bind(id)
        .fetch_one(&*self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.get::<i64, _>("count") as u64)
    }
}
