//! parlor - a real-time multi-room chat engine
//!
//! Clients join named rooms, exchange messages broadcast to all room
//! members, and have messages filtered against per-room or global
//! keyword rules before persistence and delivery. Authentication is an
//! external concern: the engine consumes a resolved username and role
//! per connection.

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod identity;
pub mod logging;
pub mod server;

pub use chat::{ChatEngine, ChatEvent, ChatSession, RoomRegistry, SendOutcome};
pub use config::Config;
pub use db::{
    Database, DbPool, KeywordRepository, KeywordRule, MatchType, Message, MessageRepository, Room,
    RoomRepository, RuleAction,
};
pub use error::{ParlorError, Result};
pub use filter::{FilterResult, KeywordFilter};
pub use identity::{Identity, Role};
