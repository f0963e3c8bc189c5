//! Room-scoped events delivered to connected members.

use serde::Serialize;

use crate::db::Message;

/// An event broadcast to the members of a room.
///
/// Serialized with a `type` tag so the transport can forward frames to
/// clients as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Room status notice (join, leave, archive).
    Status {
        /// Notice text.
        msg: String,
    },
    /// A new chat message.
    Message {
        /// Message ID.
        id: i64,
        /// Sender's username.
        username: String,
        /// Post-filter content.
        content: String,
        /// RFC 3339 timestamp.
        timestamp: String,
    },
    /// A message was deleted by moderation; clients remove it from view.
    DeleteMessage {
        /// Deleted message ID.
        id: i64,
    },
}

impl ChatEvent {
    /// Create a status notice.
    pub fn status(msg: impl Into<String>) -> Self {
        ChatEvent::Status { msg: msg.into() }
    }

    /// Create a message event from a stored message.
    pub fn message(message: &Message) -> Self {
        ChatEvent::Message {
            id: message.id,
            username: message.username.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp.to_rfc3339(),
        }
    }

    /// Create a delete notification.
    pub fn delete_message(id: i64) -> Self {
        ChatEvent::DeleteMessage { id }
    }
}
