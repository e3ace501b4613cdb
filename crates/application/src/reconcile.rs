//! 计数对账
//!
//! 缓存计数走实时 INCR/DECR，事件丢失或缓存淘汰会造成漂移。
//! 对账任务全量 keyset 扫描权威来源，把缓存覆盖写成权威值。
//! 单个聚合失败只记日志，不影响其余聚合。

use std::sync::Arc;

use config::ReconcileConfig;
use domain::repositories::{CachedCountRepository, DurableCountSource};
use tracing::{info, warn};
use uuid::Uuid;

/// 扫描轮次上限，防御 id 游标不前进导致的死循环
pub const MAX_ITERATIONS: u32 = 10_000;

/// 一次对账的结果摘要
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// 扫描到的聚合数
    pub scanned: u64,
    /// 缓存值与权威值不符、被覆盖写的聚合数
    pub corrected: u64,
    /// 处理失败（跳过）的聚合数
    pub failed: u64,
    /// 消耗的扫描轮次
    pub iterations: u32,
    /// 是否因轮次上限提前终止
    pub hit_iteration_cap: bool,
}

pub struct ReconcileService {
    durable: Arc<dyn DurableCountSource>,
    cached: Arc<dyn CachedCountRepository>,
    config: ReconcileConfig,
}

impl ReconcileService {
    pub fn new(
        durable: Arc<dyn DurableCountSource>,
        cached: Arc<dyn CachedCountRepository>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            durable,
            cached,
            config,
        }
    }

    /// 全量对账一轮
    ///
    /// 从 nil UUID 开始按 id 升序 keyset 分页，逐个聚合比较
    /// 缓存值与权威值，不一致就覆盖写。set 是幂等覆盖，
    /// 与实时 INCR/DECR 并发交错最多造成短暂偏差，下轮自愈。
    pub async fn reconcile_all(&self) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut cursor = Uuid::nil();

        while outcome.iterations < MAX_ITERATIONS {
            outcome.iterations += 1;

            let ids = match self
                .durable
                .find_ids_after(cursor, self.config.chunk_size)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(cursor = %cursor, error = %err, "对账扫描批次失败，本轮终止");
                    break;
                }
            };

            let Some(last) = ids.last().copied() else {
                break;
            };
            cursor = last;

            for id in ids {
                outcome.scanned += 1;
                match self.reconcile_one(id).await {
                    Ok(true) => outcome.corrected += 1,
                    Ok(false) => {}
                    Err(err) => {
                        outcome.failed += 1;
                        warn!(aggregate_id = %id, error = %err, "单个聚合对账失败，跳过");
                    }
                }
            }
        }

        if outcome.iterations >= MAX_ITERATIONS {
            outcome.hit_iteration_cap = true;
            warn!(
                iterations = outcome.iterations,
                scanned = outcome.scanned,
                "对账达到轮次上限，提前终止"
            );
        }

        info!(
            scanned = outcome.scanned,
            corrected = outcome.corrected,
            failed = outcome.failed,
            iterations = outcome.iterations,
            "计数对账完成"
        );

        outcome
    }

    /// 对账单个聚合，返回是否发生了纠正
    async fn reconcile_one(&self, id: Uuid) -> Result<bool, domain::RepositoryError> {
        let authoritative = self.durable.count(id).await?;
        let cached = self.cached.get_count(id).await?;

        if cached == authoritative {
            return Ok(false);
        }

        self.cached.set_count(id, authoritative).await?;
        info!(
            aggregate_id = %id,
            cached_count = cached,
            authoritative_count = authoritative,
            "缓存计数已纠正"
        );
        Ok(true)
    }
}
