//! Redis 模块
//!
//! 提供跨实例广播（Pub/Sub）与会话/计数/事件缓存存储。

pub mod counts;
pub mod error;
pub mod event_cache;
pub mod fanout;
pub mod watching_repository;

pub use counts::*;
pub use error::*;
pub use event_cache::*;
pub use fanout::*;
pub use watching_repository::*;
