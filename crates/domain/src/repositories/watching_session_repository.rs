//! 观影会话仓储接口

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::RepositoryResult;
use crate::watching_session::WatchingSession;

/// 观影会话的共享存储接口
///
/// 实现必须给会话条目设置 TTL：进程崩溃导致的断开事件丢失时，
/// TTL 过期是唯一的兜底清理手段。
#[async_trait]
pub trait WatchingSessionRepository: Send + Sync {
    /// 保存会话（新建或覆盖），并刷新 TTL
    async fn save(&self, session: &WatchingSession) -> RepositoryResult<()>;

    /// 按观看者查当前会话
    async fn find_by_watcher_id(&self, watcher_id: Uuid)
        -> RepositoryResult<Option<WatchingSession>>;

    /// 删除会话（含内容观看者集合中的成员）
    async fn delete(&self, session: &WatchingSession) -> RepositoryResult<()>;

    /// 某内容当前的观看者数量
    async fn count_by_content_id(&self, content_id: Uuid) -> RepositoryResult<u64>;
}
