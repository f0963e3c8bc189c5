//! User identity and roles for parlor.
//!
//! Authentication is an external collaborator: the engine receives a
//! resolved identity per connection and treats it as immutable input.

use std::fmt;
use std::str::FromStr;

/// User role for permission management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Role {
    /// Regular user.
    #[default]
    User = 0,
    /// Moderator (may delete, pin, approve and mute).
    Moderator = 1,
    /// Administrator (full room and keyword management).
    Admin = 2,
}

impl Role {
    /// Convert role to its string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Check if this role has at least the required permission level.
    ///
    /// # Examples
    ///
    /// ```
    /// use parlor::Role;
    ///
    /// assert!(Role::Admin.can_access(Role::Moderator));
    /// assert!(Role::Moderator.can_access(Role::Moderator));
    /// assert!(!Role::User.can_access(Role::Moderator));
    /// ```
    pub fn can_access(&self, required: Role) -> bool {
        *self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// Authenticated identity supplied per connection before any join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Unique username.
    pub username: String,
    /// Resolved role.
    pub role: Role,
}

impl Identity {
    /// Create a new identity.
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }
}
