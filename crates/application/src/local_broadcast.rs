// 单实例部署用的进程内广播器
use crate::broadcaster::{BroadcastError, FanoutBroadcaster, OutboundMessage};
use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct LocalFanoutBroadcaster {
    sender: broadcast::Sender<OutboundMessage>,
}

impl LocalFanoutBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.sender.subscribe()
    }
}

impl Default for LocalFanoutBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl FanoutBroadcaster for LocalFanoutBroadcaster {
    async fn broadcast(&self, message: OutboundMessage) -> Result<(), BroadcastError> {
        // 没有任何监听器时丢弃即可，广播是尽力而为的
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(message)
            .map_err(|err| BroadcastError::failed(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let broadcaster = LocalFanoutBroadcaster::new(8);
        let message = OutboundMessage::to_user(Uuid::new_v4(), "notifications", "{}");
        assert!(broadcaster.broadcast(message).await.is_ok());
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast() {
        let broadcaster = LocalFanoutBroadcaster::new(8);
        let mut receiver = broadcaster.subscribe();

        let message = OutboundMessage::to_user(Uuid::new_v4(), "notifications", r#"{"k":1}"#);
        broadcaster.broadcast(message.clone()).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap(), message);
    }
}
