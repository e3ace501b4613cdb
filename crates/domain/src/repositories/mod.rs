//! 仓储接口定义
//!
//! 由基础设施层提供 Postgres/Redis 实现，应用层只依赖这些 trait。

pub mod counts;
pub mod outbox_repository;
pub mod watching_session_repository;

pub use counts::*;
pub use outbox_repository::*;
pub use watching_session_repository::*;
