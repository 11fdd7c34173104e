//! In-process notification bus carrying terminal push messages.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 64;

/// Kind of bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessageKind {
    #[serde(rename = "TERMINAL_RESPONSE")]
    TerminalResponse,
}

/// A push notification: "the payment of this POS session changed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    #[serde(rename = "type")]
    pub kind: BusMessageKind,
    pub session_key: String,
}

impl BusMessage {
    pub fn terminal_response(session_key: &str) -> Self {
        Self {
            kind: BusMessageKind::TerminalResponse,
            session_key: session_key.to_string(),
        }
    }

    pub fn is_terminal_response_for(&self, session_key: &str) -> bool {
        self.kind == BusMessageKind::TerminalResponse && self.session_key == session_key
    }
}

/// Broadcast bus. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<BusMessage>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish a message. Returns how many listeners received it.
    pub fn publish(&self, message: BusMessage) -> usize {
        match self.sender.send(message) {
            Ok(n) => n,
            Err(broadcast::error::SendError(message)) => {
                debug!(session = %message.session_key, "bus message dropped, no listeners");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let msg = BusMessage::terminal_response("config-3");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "TERMINAL_RESPONSE", "sessionKey": "config-3"})
        );
        assert!(msg.is_terminal_response_for("config-3"));
        assert!(!msg.is_terminal_response_for("config-4"));
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = NotificationBus::new();
        assert_eq!(bus.publish(BusMessage::terminal_response("s")), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);
        assert_eq!(bus.publish(BusMessage::terminal_response("s")), 1);
        assert_eq!(rx.recv().await.unwrap().session_key, "s");

        drop(rx);
        assert_eq!(bus.listener_count(), 0);
    }
}
