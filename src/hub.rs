//! LiveLog Hub (component D): room-keyed pub/sub fan-out of JSON events.
//!
//! Grounded on the per-connection-channel registry pattern used for node
//! connections in the reference gateway's WebSocket handler, and on the
//! room-keyed `active_connections` map in the original Python
//! `websocket_manager`.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub const GLOBAL_ROOM: &str = "global";

pub fn task_room(task_id: &str) -> String {
    format!("task_{task_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

type Rooms = RwLock<HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<String>>>>;

/// Room-keyed connection registry. Delivery is at-most-once and
/// best-effort: a send failure deregisters the connection immediately,
/// with no retry and no buffering beyond the channel itself.
pub struct Hub {
    rooms: Rooms,
    next_id: AtomicU64,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection in `room` and hand back the receiver half
    /// the caller should forward to its transport (WebSocket, SSE, …).
    pub async fn join(&self, room: &str) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Deregister a connection; drops the room entry if it becomes empty.
    pub async fn leave(&self, room: &str, id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(room) {
            conns.remove(&id);
            if conns.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Serialize `payload` once and attempt delivery to every connection in
    /// `room`. Sends within a room are serialized in call order because the
    /// whole send pass holds the room's slot for its duration.
    pub async fn send_to(&self, room: &str, payload: &impl Serialize) {
        let text = match serde_json::to_string(payload) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(room, error = %e, "failed to serialize hub payload");
                return;
            }
        };

        let dead: Vec<ConnectionId> = {
            let rooms = self.rooms.read().await;
            let Some(conns) = rooms.get(room) else {
                return;
            };
            conns
                .iter()
                .filter_map(|(id, tx)| tx.send(text.clone()).err().map(|_| *id))
                .collect()
        };

        if !dead.is_empty() {
            let mut rooms = self.rooms.write().await;
            if let Some(conns) = rooms.get_mut(room) {
                for id in dead {
                    conns.remove(&id);
                }
                if conns.is_empty() {
                    rooms.remove(room);
                }
            }
        }
    }

    /// `sendTo` over every room.
    pub async fn broadcast_all(&self, payload: &impl Serialize) {
        let room_names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        for room in room_names {
            self.send_to(&room, payload).await;
        }
    }

    pub async fn connection_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

pub type SharedHub = Arc<Hub>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn join_then_send_delivers_to_room_only() {
        let hub = Hub::new();
        let (_id_a, mut rx_a) = hub.join("task_1").await;
        let (_id_b, mut rx_b) = hub.join("global").await;

        hub.send_to("task_1", &json!({"type": "task_output", "output_line": "hi"}))
            .await;

        let msg = rx_a.recv().await.expect("message delivered to room member");
        assert!(msg.contains("task_output"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_deregistered_on_next_send() {
        let hub = Hub::new();
        let (_id, rx) = hub.join("global").await;
        drop(rx);

        hub.send_to("global", &json!({"type": "ping"})).await;
        assert_eq!(hub.connection_count("global").await, 0);
    }

    #[tokio::test]
    async fn broadcast_all_reaches_every_room() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.join("global").await;
        let (_b, mut rx_b) = hub.join("task_2").await;

        hub.broadcast_all(&json!({"type": "subscription_sync_complete"}))
            .await;

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }
}
