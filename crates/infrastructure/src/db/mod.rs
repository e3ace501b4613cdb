//! PostgreSQL 存储层

pub mod outbox_repository;
pub mod subscriber_counts;

pub use outbox_repository::*;
pub use subscriber_counts::*;

use domain::RepositoryError;
use sqlx::{Pool, Postgres};

pub type DbPool = Pool<Postgres>;

/// 创建数据库连接池
pub async fn create_pool(config: &config::DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}
