//! Per-group broadcast rooms for the real-time channel.
//!
//! A room is a `tokio::sync::broadcast` channel created on first join and
//! torn down when its last subscriber disconnects. There is no global
//! connection table; everything hangs off this registry.

use std::collections::HashMap;

use domain::models::channel::ServerEvent;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;
use uuid::Uuid;

const ROOM_CAPACITY: usize = 64;

/// Registry of live group rooms.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<Uuid, broadcast::Sender<ServerEvent>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to a group's room, creating it on first join.
    pub async fn subscribe(&self, group_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        let mut rooms = self.rooms.lock().await;
        let sender = rooms.entry(group_id).or_insert_with(|| {
            debug!(group_id = %group_id, "Creating room");
            broadcast::channel(ROOM_CAPACITY).0
        });
        sender.subscribe()
    }

    /// Broadcasts an event to a group's room. A missing room or a room
    /// with no listeners is not an error; the event is simply dropped.
    pub async fn send(&self, group_id: Uuid, event: ServerEvent) {
        let rooms = self.rooms.lock().await;
        if let Some(sender) = rooms.get(&group_id) {
            let _ = sender.send(event);
        }
    }

    /// Removes the room if nobody is subscribed anymore. Called after a
    /// subscriber drops its receiver.
    pub async fn prune(&self, group_id: Uuid) {
        let mut rooms = self.rooms.lock().await;
        if let Some(sender) = rooms.get(&group_id) {
            if sender.receiver_count() == 0 {
                debug!(group_id = %group_id, "Tearing down empty room");
                rooms.remove(&group_id);
            }
        }
    }

    /// Number of live subscribers in a room.
    pub async fn subscriber_count(&self, group_id: Uuid) -> usize {
        let rooms = self.rooms.lock().await;
        rooms
            .get(&group_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_created_on_first_join_and_pruned_when_empty() {
        let registry = RoomRegistry::new();
        let group_id = Uuid::new_v4();

        let rx = registry.subscribe(group_id).await;
        assert_eq!(registry.subscriber_count(group_id).await, 1);

        drop(rx);
        registry.prune(group_id).await;
        assert_eq!(registry.subscriber_count(group_id).await, 0);
        assert!(registry.rooms.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let registry = RoomRegistry::new();
        let group_id = Uuid::new_v4();

        let mut rx1 = registry.subscribe(group_id).await;
        let mut rx2 = registry.subscribe(group_id).await;

        registry.send(group_id, ServerEvent::RideStarted).await;

        assert_eq!(rx1.recv().await.unwrap(), ServerEvent::RideStarted);
        assert_eq!(rx2.recv().await.unwrap(), ServerEvent::RideStarted);
    }

    #[tokio::test]
    async fn test_send_to_missing_room_is_noop() {
        let registry = RoomRegistry::new();
        registry
            .send(Uuid::new_v4(), ServerEvent::CountdownCancelled)
            .await;
    }

    #[tokio::test]
    async fn test_prune_keeps_room_with_subscribers() {
        let registry = RoomRegistry::new();
        let group_id = Uuid::new_v4();

        let _rx1 = registry.subscribe(group_id).await;
        let rx2 = registry.subscribe(group_id).await;
        drop(rx2);

        registry.prune(group_id).await;
        assert_eq!(registry.subscriber_count(group_id).await, 1);
    }
}
