//! Message store for parlor.
//!
//! Messages are the durable record of room history, with pin, approve
//! and delete state driven by moderation.

use chrono::{DateTime, Utc};

use crate::Result;

use super::DbPool;

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique, strictly increasing message ID.
    pub id: i64,
    /// Sender's username.
    pub username: String,
    /// Message content, post-filter (possibly annotated).
    pub content: String,
    /// Engine-assigned timestamp.
    pub timestamp: DateTime<Utc>,
    /// Room the message belongs to.
    pub room: String,
    /// Pinned messages are listed first regardless of insertion order.
    pub pinned: bool,
    /// Unapproved non-pinned messages are hidden from listings.
    pub approved: bool,
}

/// Database row type for Message.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    username: String,
    content: String,
    timestamp: String,
    room: String,
    pinned: bool,
    approved: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Self {
            id: row.id,
            username: row.username,
            content: row.content,
            timestamp,
            room: row.room,
            pinned: row.pinned,
            approved: row.approved,
        }
    }
}

/// Repository for message store operations.
pub struct MessageRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> MessageRepository<'a> {
    /// Create a new MessageRepository with the given pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Append a message to a room.
    ///
    /// The timestamp is assigned here, never taken from the client.
    /// Ids come from the store's serialized sequence, so concurrent
    /// appends never collide.
    pub async fn append(&self, room: &str, username: &str, content: &str) -> Result<Message> {
        let timestamp = Utc::now();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (username, content, timestamp, room)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(content)
        .bind(timestamp.to_rfc3339())
        .bind(room)
        .fetch_one(self.pool)
        .await?;

        Ok(Message {
            id,
            username: username.to_string(),
            content: content.to_string(),
            timestamp,
            room: room.to_string(),
            pinned: false,
            approved: true,
        })
    }

    /// Get a message by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Message>> {
        let result = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, username, content, timestamp, room, pinned, approved
            FROM messages
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(result.map(Message::from))
    }

    /// List the visible messages of a room.
    ///
    /// Pinned messages come first in insertion order, then non-pinned
    /// approved messages in insertion order. Unapproved non-pinned
    /// messages are excluded; pinned messages are visible regardless of
    /// approval.
    pub async fn list_visible(&self, room: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, username, content, timestamp, room, pinned, approved
            FROM messages
            WHERE room = ? AND (pinned = 1 OR approved = 1)
            ORDER BY pinned DESC, id ASC
            "#,
        )
        .bind(room)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    /// Delete a message by ID.
    ///
    /// Returns the room the message belonged to, or None if absent.
    pub async fn delete(&self, id: i64) -> Result<Option<String>> {
        let room: Option<String> =
            sqlx::query_scalar("DELETE FROM messages WHERE id = ? RETURNING room")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;

        Ok(room)
    }

    /// Set the pinned flag on a message.
    ///
    /// Returns false if the message doesn't exist.
    pub async fn set_pinned(&self, id: i64, pinned: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET pinned = ? WHERE id = ?")
            .bind(pinned)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the approved flag on a message.
    ///
    /// Returns false if the message doesn't exist.
    pub async fn set_approved(&self, id: i64, approved: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET approved = ? WHERE id = ?")
            .bind(approved)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete all messages of a room. Used when a room is deleted.
    pub async fn delete_room(&self, room: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM messages WHERE room = ?")
            .bind(room)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    /// Count messages in a room, visible or not.
    pub async fn count(&self, room: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE room = ?")
            .bind(room)
            .fetch_one(self.pool)
            .await?;

        Ok(count.0)
    }
}
