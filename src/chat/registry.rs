//! Room registry for parlor.
//!
//! Tracks which connections are members of which room and delivers
//! events to them. The registry holds one bounded queue sender per
//! member; the transport layer drains the matching receiver. Delivery
//! is best-effort per connection: a slow member never blocks the rest.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::event::ChatEvent;

/// Live room membership and event fan-out.
///
/// Membership is ephemeral: it only reflects connections that joined
/// and have not left, disconnected or overflowed their queue. Room
/// existence and join policy are validated by the engine before a
/// connection is registered here.
pub struct RoomRegistry {
    /// Per-room map of connection ID to outbound queue sender.
    rooms: RwLock<HashMap<String, HashMap<String, mpsc::Sender<ChatEvent>>>>,
    /// Capacity of each member's outbound queue.
    queue_capacity: usize,
}

impl RoomRegistry {
    /// Create a registry with the given per-connection queue capacity.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a connection as a member of a room and return the
    /// receiving half of its event queue.
    ///
    /// Joining a room twice is a re-registration: the previous queue is
    /// replaced, never duplicated.
    pub async fn join(&self, room: &str, connection_id: &str) -> mpsc::Receiver<ChatEvent> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string(), sender);

        receiver
    }

    /// Remove a connection from a room. No-op if not a member.
    pub async fn leave(&self, room: &str, connection_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };

        let removed = members.remove(connection_id).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Remove a connection from every room it belongs to.
    ///
    /// This is the unconditional cleanup path on disconnect.
    pub async fn leave_all(&self, connection_id: &str) {
        let mut rooms = self.rooms.write().await;
        for members in rooms.values_mut() {
            members.remove(connection_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }

    /// Remove a room and all of its members (used on room deletion).
    ///
    /// Dropping the senders closes every member's queue.
    pub async fn drop_room(&self, room: &str) {
        self.rooms.write().await.remove(room);
    }

    /// Deliver an event to every current member of a room, the sender
    /// included.
    ///
    /// Best-effort per connection: a member whose queue is full is
    /// dropped from the room (its receiver closes), a member whose
    /// receiver is gone is pruned. Returns the number of members that
    /// received the event.
    pub async fn broadcast(&self, room: &str, event: &ChatEvent) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|connection_id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Dropping slow connection {connection_id} from room {room}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Pruning closed connection {connection_id} from room {room}");
                false
            }
        });

        if members.is_empty() {
            rooms.remove(room);
        }
        delivered
    }

    /// Check if a connection is a member of a room.
    pub async fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.rooms
            .read()
            .await
            .get(room)
            .is_some_and(|members| members.contains_key(connection_id))
    }

    /// Number of members in a room.
    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or(0, |members| members.len())
    }

    /// Connection IDs of a room's members.
    pub async fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or_else(Vec::new, |members| members.keys().cloned().collect())
    }
}
