//! Chat engine for parlor.
//!
//! The engine is the explicitly owned service object shared by all
//! connection handlers: it wires the message store, the keyword filter
//! and the room registry together, and hosts the moderation gateway.
//! All privileged operations take the caller's identity and check the
//! role before touching shared state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::db::{
    Database, DbPool, KeywordRepository, KeywordRule, MatchType, Message, MessageRepository, Room,
    RoomRepository, RuleAction,
};
use crate::filter::{CompiledRule, FilterResult, KeywordFilter};
use crate::identity::{Identity, Role};
use crate::{ParlorError, Result};

use super::event::ChatEvent;
use super::registry::RoomRegistry;

/// Outcome of a send, reported to the sender only.
///
/// A blocked or muted send stores nothing and emits no events; the
/// explicit outcome (instead of a silent drop) lets the transport tell
/// the sender what happened without the room noticing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Message stored and broadcast.
    Delivered(Message),
    /// A blocking keyword rule matched.
    Blocked,
    /// The sender is muted.
    Muted,
}

/// Shared chat engine.
///
/// One instance per process, created at startup and handed to each
/// connection handler; every mutation of shared state funnels through
/// its API.
pub struct ChatEngine {
    db: Database,
    registry: RoomRegistry,
    filter: RwLock<KeywordFilter>,
    /// Muted usernames with their mute deadline. Ephemeral, like room
    /// membership.
    mutes: RwLock<HashMap<String, DateTime<Utc>>>,
    history_limit: usize,
}

impl ChatEngine {
    /// Create an engine over an open database.
    ///
    /// Loads the active keyword rule set from storage.
    pub async fn new(db: Database, config: &ChatConfig) -> Result<Self> {
        let rules = KeywordRepository::new(db.pool()).list().await?;
        let filter = KeywordFilter::from_rules(&rules);
        info!("Chat engine started with {} keyword rules", filter.rule_count());

        Ok(Self {
            db,
            registry: RoomRegistry::new(config.queue_capacity),
            filter: RwLock::new(filter),
            mutes: RwLock::new(HashMap::new()),
            history_limit: config.history_limit,
        })
    }

    /// The live room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// The underlying database pool.
    pub fn pool(&self) -> &DbPool {
        self.db.pool()
    }

    /// Create the room if it doesn't exist yet (startup seeding).
    pub async fn ensure_room(&self, name: &str) -> Result<()> {
        let repo = RoomRepository::new(self.db.pool());
        if repo.get_by_name(name).await?.is_none() {
            repo.create(name, None).await?;
            info!("Created default room {name}");
        }
        Ok(())
    }

    /// Validate that a room accepts a join with the given password.
    ///
    /// Membership is untouched; failures are reported to the caller
    /// only.
    pub(crate) async fn authorize_join(&self, room: &str, password: Option<&str>) -> Result<Room> {
        let repo = RoomRepository::new(self.db.pool());
        let room_row = repo
            .get_by_name(room)
            .await?
            .ok_or_else(|| ParlorError::RoomNotFound(room.to_string()))?;

        if room_row.archived {
            return Err(ParlorError::RoomArchived(room_row.name));
        }
        if let Some(expected) = &room_row.password {
            if password != Some(expected.as_str()) {
                return Err(ParlorError::AuthFailed);
            }
        }

        Ok(room_row)
    }

    /// Run a message through mute check and keyword filter, then store
    /// and broadcast it.
    pub(crate) async fn submit_message(
        &self,
        room: &str,
        username: &str,
        text: &str,
    ) -> Result<SendOutcome> {
        if self.is_muted(username).await {
            debug!("Dropping message from muted user {username}");
            return Ok(SendOutcome::Muted);
        }

        let filtered = self.filter.read().await.evaluate(room, text);
        match filtered {
            FilterResult::Block => {
                debug!("Blocked message from {username} in {room}");
                Ok(SendOutcome::Blocked)
            }
            FilterResult::Pass(content) => {
                let message = MessageRepository::new(self.db.pool())
                    .append(room, username, &content)
                    .await?;
                self.registry
                    .broadcast(room, &ChatEvent::message(&message))
                    .await;
                Ok(SendOutcome::Delivered(message))
            }
        }
    }

    /// Whether a user is currently muted. Expired mutes are pruned.
    pub async fn is_muted(&self, username: &str) -> bool {
        let now = Utc::now();
        let mut mutes = self.mutes.write().await;
        match mutes.get(username) {
            Some(until) if *until > now => true,
            Some(_) => {
                mutes.remove(username);
                false
            }
            None => false,
        }
    }

    /// Visible messages of a room: pinned first, then approved,
    /// each group in insertion order.
    pub async fn messages(&self, room: &str) -> Result<Vec<Message>> {
        MessageRepository::new(self.db.pool()).list_visible(room).await
    }

    /// Visible messages with the non-pinned tail capped to the
    /// configured history limit. Used for replay on join.
    pub async fn recent_messages(&self, room: &str) -> Result<Vec<Message>> {
        let mut messages = self.messages(room).await?;

        // Non-pinned messages are contiguous at the end per the
        // ordering contract; cap that tail, keep every pinned message.
        let split = messages
            .iter()
            .position(|m| !m.pinned)
            .unwrap_or(messages.len());
        let tail_len = messages.len() - split;
        if tail_len > self.history_limit {
            messages.drain(split..messages.len() - self.history_limit);
        }

        Ok(messages)
    }

    /// Joinable (non-archived) rooms.
    pub async fn rooms(&self) -> Result<Vec<Room>> {
        RoomRepository::new(self.db.pool()).list_active().await
    }

    // --- Moderation gateway -------------------------------------------

    /// Delete a message and notify the room (moderator or admin).
    ///
    /// A missing id is an idempotent no-op.
    pub async fn delete_message(&self, identity: &Identity, id: i64) -> Result<()> {
        self.require(identity, Role::Moderator, "delete messages")?;

        match MessageRepository::new(self.db.pool()).delete(id).await? {
            Some(room) => {
                info!("{} deleted message {id} in {room}", identity.username);
                self.registry
                    .broadcast(&room, &ChatEvent::delete_message(id))
                    .await;
            }
            None => debug!("Delete of missing message {id} ignored"),
        }
        Ok(())
    }

    /// Pin or unpin a message (moderator or admin).
    pub async fn set_pinned(&self, identity: &Identity, id: i64, pinned: bool) -> Result<()> {
        self.require(identity, Role::Moderator, "pin messages")?;

        if !MessageRepository::new(self.db.pool()).set_pinned(id, pinned).await? {
            return Err(ParlorError::NotFound("message".to_string()));
        }
        Ok(())
    }

    /// Approve or unapprove a message (moderator or admin).
    pub async fn set_approved(&self, identity: &Identity, id: i64, approved: bool) -> Result<()> {
        self.require(identity, Role::Moderator, "approve messages")?;

        if !MessageRepository::new(self.db.pool()).set_approved(id, approved).await? {
            return Err(ParlorError::NotFound("message".to_string()));
        }
        Ok(())
    }

    /// Mute a user until the given deadline (moderator or admin).
    pub async fn mute_user(
        &self,
        identity: &Identity,
        username: &str,
        until: DateTime<Utc>,
    ) -> Result<()> {
        self.require(identity, Role::Moderator, "mute users")?;

        info!("{} muted {username} until {until}", identity.username);
        self.mutes.write().await.insert(username.to_string(), until);
        Ok(())
    }

    /// Lift a user's mute (moderator or admin). No-op if not muted.
    pub async fn unmute_user(&self, identity: &Identity, username: &str) -> Result<()> {
        self.require(identity, Role::Moderator, "mute users")?;

        self.mutes.write().await.remove(username);
        Ok(())
    }

    // --- Administration -----------------------------------------------

    /// Create a room (admin).
    pub async fn create_room(
        &self,
        identity: &Identity,
        name: &str,
        password: Option<&str>,
    ) -> Result<Room> {
        self.require(identity, Role::Admin, "create rooms")?;

        let room = RoomRepository::new(self.db.pool()).create(name, password).await?;
        info!("{} created room {name}", identity.username);
        Ok(room)
    }

    /// Archive or restore a room (admin).
    ///
    /// Archiving makes the room unjoinable; members connected at the
    /// time stay and are notified.
    pub async fn set_archived(&self, identity: &Identity, name: &str, archived: bool) -> Result<()> {
        self.require(identity, Role::Admin, "archive rooms")?;

        if !RoomRepository::new(self.db.pool()).set_archived(name, archived).await? {
            return Err(ParlorError::RoomNotFound(name.to_string()));
        }

        let notice = if archived {
            format!("Room {name} has been archived.")
        } else {
            format!("Room {name} has been restored.")
        };
        self.registry.broadcast(name, &ChatEvent::status(notice)).await;
        Ok(())
    }

    /// Delete a room with its entire message history (admin).
    ///
    /// Members are notified, then their membership is dropped.
    pub async fn delete_room(&self, identity: &Identity, name: &str) -> Result<()> {
        self.require(identity, Role::Admin, "delete rooms")?;

        if !RoomRepository::new(self.db.pool()).delete(name).await? {
            return Err(ParlorError::RoomNotFound(name.to_string()));
        }
        let cascaded = MessageRepository::new(self.db.pool()).delete_room(name).await?;
        info!("{} deleted room {name} ({cascaded} messages)", identity.username);

        self.registry
            .broadcast(name, &ChatEvent::status(format!("Room {name} has been deleted.")))
            .await;
        self.registry.drop_room(name).await;
        Ok(())
    }

    /// Add a keyword rule (admin).
    ///
    /// Malformed regex patterns are rejected here with `InvalidRule`
    /// and never reach storage.
    pub async fn add_keyword(
        &self,
        identity: &Identity,
        word: &str,
        action: RuleAction,
        match_type: MatchType,
        room: Option<&str>,
    ) -> Result<KeywordRule> {
        self.require(identity, Role::Admin, "manage keywords")?;

        // Creation-time validation through the same compile path the
        // filter uses.
        CompiledRule::compile(&KeywordRule {
            id: 0,
            word: word.to_string(),
            action,
            match_type,
            room: room.map(str::to_string),
        })?;

        let rule = KeywordRepository::new(self.db.pool())
            .add(word, action, match_type, room)
            .await?;
        self.reload_filter().await?;
        info!("{} added keyword rule {}", identity.username, rule.id);
        Ok(rule)
    }

    /// Remove a keyword rule (admin).
    pub async fn remove_keyword(&self, identity: &Identity, id: i64) -> Result<()> {
        self.require(identity, Role::Admin, "manage keywords")?;

        if !KeywordRepository::new(self.db.pool()).delete(id).await? {
            return Err(ParlorError::NotFound("keyword rule".to_string()));
        }
        self.reload_filter().await?;
        Ok(())
    }

    /// Rebuild the compiled rule set from storage.
    async fn reload_filter(&self) -> Result<()> {
        let rules = KeywordRepository::new(self.db.pool()).list().await?;
        *self.filter.write().await = KeywordFilter::from_rules(&rules);
        Ok(())
    }

    fn require(&self, identity: &Identity, required: Role, what: &str) -> Result<()> {
        if identity.role.can_access(required) {
            Ok(())
        } else {
            Err(ParlorError::Unauthorized(what.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_engine() -> ChatEngine {
        let db = Database::open_in_memory().await.unwrap();
        let engine = ChatEngine::new(db, &ChatConfig::default()).await.unwrap();
        engine.ensure_room("lounge").await.unwrap();
        engine
    }

    fn admin() -> Identity {
        Identity::new("root", Role::Admin)
    }

    fn moderator() -> Identity {
        Identity::new("mona", Role::Moderator)
    }

    fn user() -> Identity {
        Identity::new("alice", Role::User)
    }

    #[tokio::test]
    async fn test_ensure_room_idempotent() {
        let engine = setup_engine().await;
        engine.ensure_room("lounge").await.unwrap();
        assert_eq!(engine.rooms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authorize_join_missing_room() {
        let engine = setup_engine().await;
        let result = engine.authorize_join("nowhere", None).await;
        assert!(matches!(result, Err(ParlorError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_authorize_join_archived_room() {
        let engine = setup_engine().await;
        engine.set_archived(&admin(), "lounge", true).await.unwrap();

        let result = engine.authorize_join("lounge", None).await;
        assert!(matches!(result, Err(ParlorError::RoomArchived(_))));
    }

    #[tokio::test]
    async fn test_authorize_join_password() {
        let engine = setup_engine().await;
        engine
            .create_room(&admin(), "vault", Some("secret"))
            .await
            .unwrap();

        assert!(matches!(
            engine.authorize_join("vault", None).await,
            Err(ParlorError::AuthFailed)
        ));
        assert!(matches!(
            engine.authorize_join("vault", Some("wrong")).await,
            Err(ParlorError::AuthFailed)
        ));
        assert!(engine.authorize_join("vault", Some("secret")).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_message_stores_and_broadcasts() {
        let engine = setup_engine().await;
        let mut rx = engine.registry().join("lounge", "c1").await;

        let outcome = engine.submit_message("lounge", "alice", "hello").await.unwrap();
        let SendOutcome::Delivered(message) = outcome else {
            panic!("expected delivered outcome");
        };
        assert_eq!(message.content, "hello");

        let event = rx.recv().await.unwrap();
        assert_eq!(event, ChatEvent::message(&message));

        let stored = engine.messages("lounge").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, message.id);
    }

    #[tokio::test]
    async fn test_submit_blocked_message() {
        let engine = setup_engine().await;
        engine
            .add_keyword(&admin(), "spam", RuleAction::Block, MatchType::Exact, None)
            .await
            .unwrap();
        let mut rx = engine.registry().join("lounge", "c1").await;

        let outcome = engine.submit_message("lounge", "alice", "spam").await.unwrap();
        assert_eq!(outcome, SendOutcome::Blocked);

        // Nothing stored, nothing broadcast
        assert!(engine.messages("lounge").await.unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_submit_marked_message() {
        let engine = setup_engine().await;
        engine
            .add_keyword(
                &admin(),
                "foo",
                RuleAction::Mark,
                MatchType::CaseInsensitive,
                None,
            )
            .await
            .unwrap();

        let outcome = engine
            .submit_message("lounge", "alice", "Foo bar")
            .await
            .unwrap();
        let SendOutcome::Delivered(message) = outcome else {
            panic!("expected delivered outcome");
        };
        // The stored content is the annotated text
        assert_eq!(message.content, "<mark>Foo</mark> bar");
    }

    #[tokio::test]
    async fn test_submit_while_muted() {
        let engine = setup_engine().await;
        engine
            .mute_user(&moderator(), "alice", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        let outcome = engine.submit_message("lounge", "alice", "hi").await.unwrap();
        assert_eq!(outcome, SendOutcome::Muted);
        assert!(engine.messages("lounge").await.unwrap().is_empty());

        // Other users are unaffected
        let outcome = engine.submit_message("lounge", "bob", "hi").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn test_mute_expires() {
        let engine = setup_engine().await;
        engine
            .mute_user(&moderator(), "alice", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        assert!(!engine.is_muted("alice").await);
        let outcome = engine.submit_message("lounge", "alice", "hi").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Delivered(_)));
    }

    #[tokio::test]
    async fn test_unmute() {
        let engine = setup_engine().await;
        engine
            .mute_user(&moderator(), "alice", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        engine.unmute_user(&moderator(), "alice").await.unwrap();
        assert!(!engine.is_muted("alice").await);
    }

    #[tokio::test]
    async fn test_mute_requires_moderator() {
        let engine = setup_engine().await;
        let result = engine
            .mute_user(&user(), "bob", Utc::now() + Duration::minutes(5))
            .await;
        assert!(matches!(result, Err(ParlorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_delete_message_broadcasts_to_its_room_only() {
        let engine = setup_engine().await;
        engine.ensure_room("tech").await.unwrap();

        let mut lounge_rx = engine.registry().join("lounge", "c1").await;
        let mut tech_rx = engine.registry().join("tech", "c2").await;

        let SendOutcome::Delivered(message) =
            engine.submit_message("lounge", "alice", "bye").await.unwrap()
        else {
            panic!("expected delivered outcome");
        };
        lounge_rx.recv().await.unwrap();

        engine.delete_message(&moderator(), message.id).await.unwrap();

        assert_eq!(
            lounge_rx.recv().await.unwrap(),
            ChatEvent::delete_message(message.id)
        );
        assert!(tech_rx.try_recv().is_err());
        assert!(engine.messages("lounge").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_message_is_noop() {
        let engine = setup_engine().await;
        engine.delete_message(&moderator(), 999).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_message_requires_moderator() {
        let engine = setup_engine().await;
        let result = engine.delete_message(&user(), 1).await;
        assert!(matches!(result, Err(ParlorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_set_pinned_and_approved() {
        let engine = setup_engine().await;
        let SendOutcome::Delivered(message) =
            engine.submit_message("lounge", "alice", "notice").await.unwrap()
        else {
            panic!("expected delivered outcome");
        };

        engine.set_pinned(&moderator(), message.id, true).await.unwrap();
        engine.set_approved(&moderator(), message.id, false).await.unwrap();

        let visible = engine.messages("lounge").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].pinned);

        assert!(matches!(
            engine.set_pinned(&moderator(), 999, true).await,
            Err(ParlorError::NotFound(_))
        ));
        assert!(matches!(
            engine.set_pinned(&user(), message.id, false).await,
            Err(ParlorError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_create_room_requires_admin() {
        let engine = setup_engine().await;
        let result = engine.create_room(&moderator(), "annex", None).await;
        assert!(matches!(result, Err(ParlorError::Unauthorized(_))));

        engine.create_room(&admin(), "annex", None).await.unwrap();
        assert_eq!(engine.rooms().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_set_archived_notifies_members() {
        let engine = setup_engine().await;
        let mut rx = engine.registry().join("lounge", "c1").await;

        engine.set_archived(&admin(), "lounge", true).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ChatEvent::status("Room lounge has been archived.")
        );
        // Members are not force-disconnected
        assert!(engine.registry().is_member("lounge", "c1").await);
    }

    #[tokio::test]
    async fn test_set_archived_missing_room() {
        let engine = setup_engine().await;
        let result = engine.set_archived(&admin(), "nowhere", true).await;
        assert!(matches!(result, Err(ParlorError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_room_cascades_and_drops_members() {
        let engine = setup_engine().await;
        let mut rx = engine.registry().join("lounge", "c1").await;
        engine.submit_message("lounge", "alice", "hi").await.unwrap();
        rx.recv().await.unwrap();

        engine.delete_room(&admin(), "lounge").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ChatEvent::status("Room lounge has been deleted.")
        );
        // Queue closed after the notice
        assert!(rx.recv().await.is_none());
        assert!(engine.rooms().await.unwrap().is_empty());
        assert!(engine.messages("lounge").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_keyword_invalid_regex() {
        let engine = setup_engine().await;
        let result = engine
            .add_keyword(&admin(), "(unclosed", RuleAction::Block, MatchType::Regex, None)
            .await;
        assert!(matches!(result, Err(ParlorError::InvalidRule(_))));

        // Nothing reached storage
        let rules = KeywordRepository::new(engine.pool()).list().await.unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_remove_keyword_reloads_filter() {
        let engine = setup_engine().await;
        let rule = engine
            .add_keyword(&admin(), "spam", RuleAction::Block, MatchType::Exact, None)
            .await
            .unwrap();

        assert_eq!(
            engine.submit_message("lounge", "alice", "spam").await.unwrap(),
            SendOutcome::Blocked
        );

        engine.remove_keyword(&admin(), rule.id).await.unwrap();

        assert!(matches!(
            engine.submit_message("lounge", "alice", "spam").await.unwrap(),
            SendOutcome::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn test_keyword_management_requires_admin() {
        let engine = setup_engine().await;
        let result = engine
            .add_keyword(&moderator(), "spam", RuleAction::Block, MatchType::Exact, None)
            .await;
        assert!(matches!(result, Err(ParlorError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_recent_messages_caps_tail_keeps_pinned() {
        let db = Database::open_in_memory().await.unwrap();
        let config = ChatConfig {
            history_limit: 2,
            ..ChatConfig::default()
        };
        let engine = ChatEngine::new(db, &config).await.unwrap();
        engine.ensure_room("lounge").await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let SendOutcome::Delivered(m) = engine
                .submit_message("lounge", "alice", &format!("msg {i}"))
                .await
                .unwrap()
            else {
                panic!("expected delivered outcome");
            };
            ids.push(m.id);
        }
        engine.set_pinned(&moderator(), ids[0], true).await.unwrap();

        let recent = engine.recent_messages("lounge").await.unwrap();
        let got: Vec<i64> = recent.iter().map(|m| m.id).collect();
        // Pinned message survives, tail capped to the newest two
        assert_eq!(got, vec![ids[0], ids[3], ids[4]]);
    }
}
