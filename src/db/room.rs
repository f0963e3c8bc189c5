//! Room model and repository for parlor.

use crate::{ParlorError, Result};

use super::DbPool;

/// A chat room.
///
/// A room is a namespace for messages and a live membership set.
/// Archived rooms reject new joins but retain history.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Room {
    /// Room ID.
    pub id: i64,
    /// Unique room name.
    pub name: String,
    /// Optional join password, compared exactly.
    pub password: Option<String>,
    /// Whether the room is archived.
    pub archived: bool,
}

/// Repository for room operations.
pub struct RoomRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> RoomRepository<'a> {
    /// Create a new RoomRepository with the given pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new room.
    ///
    /// Returns `RoomExists` if a room with that name already exists.
    pub async fn create(&self, name: &str, password: Option<&str>) -> Result<Room> {
        let result = sqlx::query("INSERT INTO rooms (name, password) VALUES (?, ?)")
            .bind(name)
            .bind(password)
            .execute(self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ParlorError::RoomExists(name.to_string())
                }
                _ => ParlorError::Database(e.to_string()),
            })?;

        Ok(Room {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            password: password.map(str::to_string),
            archived: false,
        })
    }

    /// Get a room by name.
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Room>> {
        let result = sqlx::query_as::<_, Room>(
            "SELECT id, name, password, archived FROM rooms WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool)
        .await?;

        Ok(result)
    }

    /// List all rooms, sorted by name.
    pub async fn list(&self) -> Result<Vec<Room>> {
        let rooms = sqlx::query_as::<_, Room>(
            "SELECT id, name, password, archived FROM rooms ORDER BY name",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rooms)
    }

    /// List non-archived rooms, sorted by name.
    pub async fn list_active(&self) -> Result<Vec<Room>> {
        let rooms = sqlx::query_as::<_, Room>(
            "SELECT id, name, password, archived FROM rooms WHERE archived = 0 ORDER BY name",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rooms)
    }

    /// Set the archived flag on a room.
    ///
    /// Returns false if the room doesn't exist.
    pub async fn set_archived(&self, name: &str, archived: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE rooms SET archived = ? WHERE name = ?")
            .bind(archived)
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a room by name.
    ///
    /// Returns false if the room doesn't exist. Messages are cascaded
    /// separately by the caller through the message repository.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
