use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 用户通知目的地前缀/后缀
pub const USER_DESTINATION_PREFIX: &str = "users/";
pub const USER_DESTINATION_SUFFIX: &str = "/notifications";

/// 观影频道目的地前缀/后缀
pub const WATCH_DESTINATION_PREFIX: &str = "contents/";
pub const WATCH_DESTINATION_SUFFIX: &str = "/watch";

/// 跨实例投递的出站消息
///
/// destination 决定消息在接收实例上如何再分发：
/// 用户目的地交给本地 SSE 注册表，其余目的地由持有对应
/// 订阅的传输层处理，无人认领则静默丢弃。
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutboundMessage {
    pub destination: String,
    pub event_name: String,
    pub payload: String,
}

impl OutboundMessage {
    pub fn to_user(user_id: Uuid, event_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            destination: user_destination(user_id),
            event_name: event_name.into(),
            payload: payload.into(),
        }
    }

    pub fn to_watch_channel(
        content_id: Uuid,
        event_name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: watch_destination(content_id),
            event_name: event_name.into(),
            payload: payload.into(),
        }
    }
}

pub fn user_destination(user_id: Uuid) -> String {
    format!("{}{}{}", USER_DESTINATION_PREFIX, user_id, USER_DESTINATION_SUFFIX)
}

pub fn watch_destination(content_id: Uuid) -> String {
    format!("{}{}{}", WATCH_DESTINATION_PREFIX, content_id, WATCH_DESTINATION_SUFFIX)
}

/// 从用户目的地解析出用户 id，非用户目的地返回 None
pub fn parse_user_destination(destination: &str) -> Option<Uuid> {
    let rest = destination.strip_prefix(USER_DESTINATION_PREFIX)?;
    let id = rest.strip_suffix(USER_DESTINATION_SUFFIX)?;
    Uuid::parse_str(id).ok()
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 跨实例广播接口
///
/// Local 实现走进程内通道，Redis 实现发布到共享频道，
/// 每个实例的监听器收到后按 destination 过滤再分发。
#[async_trait]
pub trait FanoutBroadcaster: Send + Sync {
    async fn broadcast(&self, message: OutboundMessage) -> Result<(), BroadcastError>;
}

/// 广播到达接收实例后的本地再分发接口
///
/// SSE 注册表只认领用户目的地；观影频道等其他目的地由传输层
/// 注册各自的分发器认领。返回是否完成本地投递。
#[async_trait]
pub trait OutboundDispatcher: Send + Sync {
    async fn dispatch(&self, message: &OutboundMessage) -> bool;
}

/// 把多个分发器串成一个，每条消息依次交给全部分发器
pub struct DispatcherChain {
    dispatchers: Vec<std::sync::Arc<dyn OutboundDispatcher>>,
}

impl DispatcherChain {
    pub fn new(dispatchers: Vec<std::sync::Arc<dyn OutboundDispatcher>>) -> Self {
        Self { dispatchers }
    }
}

#[async_trait]
impl OutboundDispatcher for DispatcherChain {
    async fn dispatch(&self, message: &OutboundMessage) -> bool {
        let mut delivered = false;
        for dispatcher in &self.dispatchers {
            delivered |= dispatcher.dispatch(message).await;
        }
        delivered
    }
}
