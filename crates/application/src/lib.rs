//! 应用层：中继、死信、实时推送与对账服务
//!
//! 所有对外部系统的访问都通过 trait 进行（EventPublisher、FanoutBroadcaster、
//! AlertPublisher、仓储接口），基础设施层提供具体实现。

pub mod broadcaster;
pub mod dead_letter;
pub mod error;
pub mod local_broadcast;
pub mod outbox_relay;
pub mod publisher;
pub mod reconcile;
pub mod sse;
pub mod watching;

pub use broadcaster::{
    BroadcastError, DispatcherChain, FanoutBroadcaster, OutboundDispatcher, OutboundMessage,
};
pub use dead_letter::{AlertError, AlertPublisher, DeadLetterMessage, DeadLetterProcessor, LogAlertPublisher};
pub use error::ApplicationError;
pub use local_broadcast::LocalFanoutBroadcaster;
pub use outbox_relay::OutboxRelay;
pub use publisher::{EventPublisher, PublishError};
pub use reconcile::{ReconcileOutcome, ReconcileService};
pub use sse::{EventCache, InMemoryEventCache, SseEvent, SseHandle, SseRegistry};
pub use watching::{WatchingSessionChange, WatchingSessionChangeType, WatchingSessionService};
