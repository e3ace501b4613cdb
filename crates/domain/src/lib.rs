//! 事件中继与在线状态子系统的核心领域模型
//!
//! 包含 Outbox 事件记录、观影会话、死信记录等核心实体，
//! 以及相关的状态机规则和仓储接口。

pub mod dead_letter;
pub mod errors;
pub mod outbox;
pub mod repositories;
pub mod watching_session;

// 重新导出常用类型
pub use dead_letter::*;
pub use errors::*;
pub use outbox::*;
pub use repositories::*;
pub use watching_session::*;
