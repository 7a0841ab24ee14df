use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Broadcast event carrying a `CursorBroadcast` payload.
pub const CURSOR_EVENT: &str = "cursor";
/// Broadcast event carrying a `ChatMessage` payload.
pub const CHAT_EVENT: &str = "chat";
/// Server-originated broadcast sent after a document save.
pub const DOCUMENT_SAVED_EVENT: &str = "document_saved";

const DOCUMENT_TOPIC_PREFIX: &str = "document:";

/// Realtime topic for a document. One topic per document.
pub fn document_topic(document_id: Uuid) -> String {
    format!("{DOCUMENT_TOPIC_PREFIX}{document_id}")
}

/// Inverse of [`document_topic`]. Returns `None` for any other topic shape.
pub fn parse_document_topic(topic: &str) -> Option<Uuid> {
    topic
        .strip_prefix(DOCUMENT_TOPIC_PREFIX)
        .and_then(|id| id.parse().ok())
}

/// Aggregate presence of a topic: presence key -> one payload per
/// connection that tracked under that key.
pub type PresenceState = BTreeMap<String, Vec<Value>>;

/// Events sent over the realtime gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, email: String },

    /// The connection is now a member of `topic`
    Subscribed { topic: String },

    /// Join was refused; the connection is not a member
    SubscribeFailed { topic: String, reason: String },

    /// Full presence state after any change
    PresenceSync { topic: String, state: PresenceState },

    PresenceJoin { topic: String, key: String, payload: Value },

    PresenceLeave { topic: String, key: String, payload: Value },

    /// Named ephemeral message relayed to the other members of a topic
    Broadcast { topic: String, event: String, payload: Value },
}

impl RealtimeEvent {
    /// Returns the topic this event belongs to. `Ready` is connection-scoped.
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Ready { .. } => None,
            Self::Subscribed { topic }
            | Self::SubscribeFailed { topic, .. }
            | Self::PresenceSync { topic, .. }
            | Self::PresenceJoin { topic, .. }
            | Self::PresenceLeave { topic, .. }
            | Self::Broadcast { topic, .. } => Some(topic),
        }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the connection
    Identify { token: String },

    Join { topic: String },

    Leave { topic: String },

    /// Add this connection's payload to the topic's presence state
    Track { topic: String, payload: Value },

    Broadcast { topic: String, event: String, payload: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_topic_round_trips() {
        let id = Uuid::new_v4();
        assert_eq!(parse_document_topic(&document_topic(id)), Some(id));
        assert_eq!(parse_document_topic("room:lobby"), None);
        assert_eq!(parse_document_topic("document:not-a-uuid"), None);
    }

    #[test]
    fn command_wire_shape() {
        let cmd = RealtimeCommand::Join { topic: "document:x".into() };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "Join");
        assert_eq!(json["data"]["topic"], "document:x");
    }
}
