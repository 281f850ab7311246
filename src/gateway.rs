use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Per-room broadcast channel capacity. A slow subscriber that lags past
/// this many undelivered messages starts losing the oldest ones, which is
/// acceptable: every delivery is a full current-state snapshot and the
/// client's polling fallback covers the gap.
const ROOM_CAPACITY: usize = 64;

/// Contract of the real-time delivery sink consumed by the listener.
///
/// Rooms are opaque identifiers (job id, build id, project id). The
/// listener checks `has_subscribers` before doing per-event store work and
/// hands resolved events to `multicast` for fan-out.
pub trait BroadcastGateway: Send + Sync + 'static {
    fn has_subscribers(&self, room: &str) -> bool;
    fn multicast(&self, room: &str, event: &str, payload: &Value);
}

/// A message delivered to every subscriber of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMessage {
    pub room: String,
    pub event: String,
    pub payload: Value,
}

/// In-process gateway implementation: one `tokio::sync::broadcast` channel
/// per room, created on first subscribe. The status server's WebSocket
/// route subscribes through this hub; tests use it to observe deliveries.
#[derive(Default)]
pub struct BroadcastHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<RoomMessage>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a room, creating its channel if this is the first
    /// subscriber. The room counts as subscribed for as long as the
    /// returned receiver (or any other) is alive.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomMessage> {
        let mut rooms = self.rooms.write().expect("room map lock poisoned");
        match rooms.get(room) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(ROOM_CAPACITY);
                rooms.insert(room.to_string(), tx);
                rx
            }
        }
    }

    /// Drop room entries whose subscribers have all disconnected, so the
    /// map does not accumulate one entry per entity ever watched.
    pub fn prune(&self) {
        let mut rooms = self.rooms.write().expect("room map lock poisoned");
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl BroadcastGateway for BroadcastHub {
    fn has_subscribers(&self, room: &str) -> bool {
        let rooms = self.rooms.read().expect("room map lock poisoned");
        rooms
            .get(room)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    fn multicast(&self, room: &str, event: &str, payload: &Value) {
        let rooms = self.rooms.read().expect("room map lock poisoned");
        if let Some(tx) = rooms.get(room) {
            // Send only fails when every receiver is gone; the event is
            // simply dropped, same as a room nobody ever joined.
            let _ = tx.send(RoomMessage {
                room: room.to_string(),
                event: event.to_string(),
                payload: payload.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_hub_has_no_subscribers() {
        let hub = BroadcastHub::new();
        assert!(!hub.has_subscribers("j1"));
    }

    #[test]
    fn subscribe_makes_room_visible() {
        let hub = BroadcastHub::new();
        let _rx = hub.subscribe("j1");
        assert!(hub.has_subscribers("j1"));
        assert!(!hub.has_subscribers("j2"));
    }

    #[test]
    fn dropping_last_receiver_empties_room() {
        let hub = BroadcastHub::new();
        let rx = hub.subscribe("j1");
        drop(rx);
        assert!(!hub.has_subscribers("j1"));
    }

    #[tokio::test]
    async fn multicast_reaches_every_subscriber() {
        let hub = BroadcastHub::new();
        let mut rx1 = hub.subscribe("j1");
        let mut rx2 = hub.subscribe("j1");

        hub.multicast("j1", "notify:console", &json!({"id": "c1"}));

        for rx in [&mut rx1, &mut rx2] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.room, "j1");
            assert_eq!(msg.event, "notify:console");
            assert_eq!(msg.payload["id"], "c1");
        }
    }

    #[test]
    fn multicast_to_unknown_room_is_dropped() {
        let hub = BroadcastHub::new();
        hub.multicast("nope", "notify:job", &json!({}));
    }

    #[test]
    fn prune_removes_dead_rooms() {
        let hub = BroadcastHub::new();
        let rx = hub.subscribe("j1");
        let _rx2 = hub.subscribe("j2");
        drop(rx);
        hub.prune();

        let rooms = hub.rooms.read().unwrap();
        assert!(!rooms.contains_key("j1"));
        assert!(rooms.contains_key("j2"));
    }
}
