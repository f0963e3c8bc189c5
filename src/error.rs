//! Error types for parlor.

use thiserror::Error;

/// Common error type for parlor.
#[derive(Error, Debug)]
pub enum ParlorError {
    /// The named room does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The named room is archived and rejects new joins.
    #[error("room is archived: {0}")]
    RoomArchived(String),

    /// Wrong room password.
    #[error("wrong room password")]
    AuthFailed,

    /// Role check failure on a privileged operation.
    #[error("permission denied: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The connection is not joined to a room.
    #[error("not joined to a room")]
    NotInRoom,

    /// A room with that name already exists.
    #[error("room already exists: {0}")]
    RoomExists(String),

    /// Malformed keyword rule, rejected at creation time.
    #[error("invalid keyword rule: {0}")]
    InvalidRule(String),

    /// Database error.
    ///
    /// This is a generic database error that wraps errors from the
    /// storage backend. Errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for ParlorError {
    fn from(e: sqlx::Error) -> Self {
        ParlorError::Database(e.to_string())
    }
}

/// Result type alias for parlor operations.
pub type Result<T> = std::result::Result<T, ParlorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_not_found_display() {
        let err = ParlorError::RoomNotFound("lounge".to_string());
        assert_eq!(err.to_string(), "room not found: lounge");
    }

    #[test]
    fn test_auth_failed_display() {
        let err = ParlorError::AuthFailed;
        assert_eq!(err.to_string(), "wrong room password");
    }

    #[test]
    fn test_unauthorized_display() {
        let err = ParlorError::Unauthorized("delete messages".to_string());
        assert_eq!(err.to_string(), "permission denied: delete messages");
    }

    #[test]
    fn test_not_found_display() {
        let err = ParlorError::NotFound("message".to_string());
        assert_eq!(err.to_string(), "message not found");
    }

    #[test]
    fn test_invalid_rule_display() {
        let err = ParlorError::InvalidRule("unclosed group".to_string());
        assert_eq!(err.to_string(), "invalid keyword rule: unclosed group");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParlorError = io_err.into();
        assert!(matches!(err, ParlorError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(ParlorError::AuthFailed)
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
