//! 聚合计数接口：持久化权威值 vs 缓存快读值
//!
//! 对账任务周期性地把缓存值纠正为权威值（覆盖写，不合并）。

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::RepositoryResult;

/// 权威计数来源（数据库聚合查询）
#[async_trait]
pub trait DurableCountSource: Send + Sync {
    /// 按 id 升序取一批聚合 id，用于 keyset 分页扫描
    async fn find_ids_after(&self, after: Uuid, limit: u32) -> RepositoryResult<Vec<Uuid>>;

    /// 某个聚合的权威计数
    async fn count(&self, id: Uuid) -> RepositoryResult<u64>;
}

/// 缓存计数存储（Redis）
#[async_trait]
pub trait CachedCountRepository: Send + Sync {
    async fn get_count(&self, id: Uuid) -> RepositoryResult<u64>;

    async fn set_count(&self, id: Uuid, count: u64) -> RepositoryResult<()>;

    /// 实时路径的原子自增
    async fn increment(&self, id: Uuid) -> RepositoryResult<()>;

    /// 实时路径的原子自减，下限为 0
    async fn decrement(&self, id: Uuid) -> RepositoryResult<()>;
}
