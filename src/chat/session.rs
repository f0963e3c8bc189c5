//! Per-connection chat session for parlor.
//!
//! A session drives the protocol state machine of one connection:
//! `Disconnected -> Joined(room) -> Disconnected`. A connection is
//! joined to at most one room; joining while joined leaves the current
//! room first.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::identity::Identity;
use crate::{ParlorError, Result};

use super::engine::{ChatEngine, SendOutcome};
use super::event::ChatEvent;

/// State machine for a single connection.
pub struct ChatSession {
    engine: Arc<ChatEngine>,
    identity: Identity,
    connection_id: String,
    /// Current room when joined.
    room: Option<String>,
}

impl ChatSession {
    /// Create a session for an authenticated identity.
    ///
    /// The identity is resolved by the external auth collaborator and
    /// is immutable for the session's lifetime.
    pub fn new(engine: Arc<ChatEngine>, identity: Identity) -> Self {
        Self {
            engine,
            identity,
            connection_id: Uuid::new_v4().to_string(),
            room: None,
        }
    }

    /// The session's identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The session's connection ID.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The room this session is joined to, if any.
    pub fn current_room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Join a room, leaving the current one first if joined.
    ///
    /// Validation failures (`RoomNotFound`, `RoomArchived`,
    /// `AuthFailed`) leave membership unchanged. On success the room is
    /// notified with an enter notice — the joiner included — and the
    /// receiving half of the connection's event queue is returned for
    /// the transport to drain.
    pub async fn join(
        &mut self,
        room: &str,
        password: Option<&str>,
    ) -> Result<mpsc::Receiver<ChatEvent>> {
        let room_row = self.engine.authorize_join(room, password).await?;

        if self.room.is_some() {
            self.leave().await;
        }

        let receiver = self
            .engine
            .registry()
            .join(&room_row.name, &self.connection_id)
            .await;
        self.room = Some(room_row.name.clone());

        self.engine
            .registry()
            .broadcast(
                &room_row.name,
                &ChatEvent::status(format!(
                    "{} enters {}.",
                    self.identity.username, room_row.name
                )),
            )
            .await;

        Ok(receiver)
    }

    /// Send a message to the joined room.
    ///
    /// Returns `NotInRoom` when not joined. Blocked and muted outcomes
    /// store nothing and emit no room events; they are reported to this
    /// sender only.
    pub async fn send(&self, text: &str) -> Result<SendOutcome> {
        let room = self.room.as_deref().ok_or(ParlorError::NotInRoom)?;
        self.engine
            .submit_message(room, &self.identity.username, text)
            .await
    }

    /// Leave the current room with a leave notice. No-op when not
    /// joined.
    pub async fn leave(&mut self) -> bool {
        let Some(room) = self.room.take() else {
            return false;
        };

        self.engine
            .registry()
            .broadcast(
                &room,
                &ChatEvent::status(format!("{} leaves {}.", self.identity.username, room)),
            )
            .await;
        self.engine.registry().leave(&room, &self.connection_id).await;
        true
    }

    /// Tear down the session: leave notice for the joined room, then
    /// membership cleanup everywhere.
    pub async fn disconnect(&mut self) {
        if self.room.is_some() {
            self.leave().await;
        }
        self.engine.registry().leave_all(&self.connection_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::db::Database;
    use crate::identity::Role;

    async fn setup_engine() -> Arc<ChatEngine> {
        let db = Database::open_in_memory().await.unwrap();
        let engine = ChatEngine::new(db, &ChatConfig::default()).await.unwrap();
        engine.ensure_room("lounge").await.unwrap();
        Arc::new(engine)
    }

    fn alice(engine: &Arc<ChatEngine>) -> ChatSession {
        ChatSession::new(Arc::clone(engine), Identity::new("alice", Role::User))
    }

    #[tokio::test]
    async fn test_join_broadcasts_enter_notice_to_joiner() {
        let engine = setup_engine().await;
        let mut session = alice(&engine);

        let mut rx = session.join("lounge", None).await.unwrap();
        assert_eq!(session.current_room(), Some("lounge"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, ChatEvent::status("alice enters lounge."));
    }

    #[tokio::test]
    async fn test_join_notifies_existing_members() {
        let engine = setup_engine().await;
        let mut first = alice(&engine);
        let mut rx1 = first.join("lounge", None).await.unwrap();
        rx1.recv().await.unwrap();

        let mut second =
            ChatSession::new(Arc::clone(&engine), Identity::new("bob", Role::User));
        let _rx2 = second.join("lounge", None).await.unwrap();

        assert_eq!(
            rx1.recv().await.unwrap(),
            ChatEvent::status("bob enters lounge.")
        );
    }

    #[tokio::test]
    async fn test_join_missing_room() {
        let engine = setup_engine().await;
        let mut session = alice(&engine);

        let result = session.join("nowhere", None).await;
        assert!(matches!(result, Err(ParlorError::RoomNotFound(_))));
        assert_eq!(session.current_room(), None);
    }

    #[tokio::test]
    async fn test_join_wrong_password_leaves_membership_unchanged() {
        let engine = setup_engine().await;
        let admin = Identity::new("root", Role::Admin);
        engine.create_room(&admin, "vault", Some("secret")).await.unwrap();

        let mut session = alice(&engine);
        let result = session.join("vault", Some("nope")).await;
        assert!(matches!(result, Err(ParlorError::AuthFailed)));
        assert_eq!(session.current_room(), None);
        assert_eq!(engine.registry().member_count("vault").await, 0);

        // Correct password joins and notifies
        let mut rx = session.join("vault", Some("secret")).await.unwrap();
        assert_eq!(engine.registry().member_count("vault").await, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            ChatEvent::status("alice enters vault.")
        );
    }

    #[tokio::test]
    async fn test_switching_rooms_leaves_previous() {
        let engine = setup_engine().await;
        engine.ensure_room("tech").await.unwrap();

        let mut observer =
            ChatSession::new(Arc::clone(&engine), Identity::new("bob", Role::User));
        let mut observer_rx = observer.join("lounge", None).await.unwrap();
        observer_rx.recv().await.unwrap();

        let mut session = alice(&engine);
        let _lounge_rx = session.join("lounge", None).await.unwrap();
        observer_rx.recv().await.unwrap(); // alice enters

        let _tech_rx = session.join("tech", None).await.unwrap();
        assert_eq!(session.current_room(), Some("tech"));

        // The previous room saw the leave notice and membership moved
        assert_eq!(
            observer_rx.recv().await.unwrap(),
            ChatEvent::status("alice leaves lounge.")
        );
        assert!(!engine
            .registry()
            .is_member("lounge", session.connection_id())
            .await);
        assert!(engine
            .registry()
            .is_member("tech", session.connection_id())
            .await);
    }

    #[tokio::test]
    async fn test_send_requires_join() {
        let engine = setup_engine().await;
        let session = alice(&engine);

        let result = session.send("hello").await;
        assert!(matches!(result, Err(ParlorError::NotInRoom)));
    }

    #[tokio::test]
    async fn test_send_delivers_to_room() {
        let engine = setup_engine().await;
        let mut session = alice(&engine);
        let mut rx = session.join("lounge", None).await.unwrap();
        rx.recv().await.unwrap();

        let outcome = session.send("hello").await.unwrap();
        let SendOutcome::Delivered(message) = outcome else {
            panic!("expected delivered outcome");
        };

        // The sender receives the echo with server-assigned fields
        let event = rx.recv().await.unwrap();
        assert_eq!(event, ChatEvent::message(&message));
    }

    #[tokio::test]
    async fn test_leave_when_not_joined() {
        let engine = setup_engine().await;
        let mut session = alice(&engine);
        assert!(!session.leave().await);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up_membership() {
        let engine = setup_engine().await;

        let mut observer =
            ChatSession::new(Arc::clone(&engine), Identity::new("bob", Role::User));
        let mut observer_rx = observer.join("lounge", None).await.unwrap();
        observer_rx.recv().await.unwrap();

        let mut session = alice(&engine);
        let _rx = session.join("lounge", None).await.unwrap();
        observer_rx.recv().await.unwrap();

        let connection_id = session.connection_id().to_string();
        session.disconnect().await;

        assert_eq!(
            observer_rx.recv().await.unwrap(),
            ChatEvent::status("alice leaves lounge.")
        );
        assert!(!engine.registry().is_member("lounge", &connection_id).await);
        assert_eq!(session.current_room(), None);
    }

    #[tokio::test]
    async fn test_disconnect_when_never_joined() {
        let engine = setup_engine().await;
        let mut session = alice(&engine);
        session.disconnect().await;
        assert_eq!(session.current_room(), None);
    }
}
