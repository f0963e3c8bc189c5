//! Chat module for parlor.
//!
//! This module provides the real-time chat engine:
//! - Room registry with membership tracking and broadcast fan-out
//! - Per-connection session state machine (join/send/disconnect)
//! - Moderation gateway (delete, pin, approve, mute, room admin)
//! - Room-scoped events delivered through bounded per-connection queues

mod engine;
mod event;
mod registry;
mod session;

pub use engine::{ChatEngine, SendOutcome};
pub use event::ChatEvent;
pub use registry::RoomRegistry;
pub use session::ChatSession;
