//! C6 — fans out live events to every connected WebSocket client. One
//! bounded queue per client; a slow client drops its own messages and is
//! never disconnected for it (SPEC_FULL.md §9 open-question decision #3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config;

/// Envelope every WS frame is wrapped in: `{"type": "...", "data": ...}`.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: T,
}

/// Registry of connected clients, guarded by one RW lock (R4): registration
/// and teardown write, `broadcast` reads.
pub struct Broadcaster {
    clients: RwLock<HashMap<u64, mpsc::Sender<Message>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new client and returns its id plus the receiving half of
    /// its outbound queue. The caller spawns the writer task that drains it.
    pub fn register(&self) -> (u64, mpsc::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(config::CLIENT_QUEUE_CAPACITY);
        self.clients
            .write()
            .expect("broadcaster lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Removes a client from the registry. Safe to call more than once.
    pub fn unregister(&self, id: u64) {
        self.clients.write().expect("broadcaster lock poisoned").remove(&id);
    }

    /// Serializes once and attempts a non-blocking send to every client.
    /// A full queue drops this message for that client only; the client
    /// itself is left registered (§9 decision #3).
    pub fn broadcast<T: Serialize>(&self, kind: &str, payload: T) {
        let envelope = Envelope { kind, data: payload };
        let text = match serde_json::to_string(&envelope) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("failed to serialize broadcast envelope {kind}: {e}");
                return;
            }
        };

        let clients = self.clients.read().expect("broadcaster lock poisoned");
        for tx in clients.values() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(Message::Text(text.clone())) {
                tracing::debug!("client queue full, dropping {kind} frame");
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().expect("broadcaster lock poisoned").len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_then_broadcast_delivers_message() {
        let b = Broadcaster::new();
        let (id, mut rx) = b.register();
        assert_eq!(b.client_count(), 1);

        b.broadcast("stats", json!({"total_packets": 5}));

        let msg = rx.recv().await.unwrap();
        let Message::Text(text) = msg else { panic!("expected text frame") };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "stats");
        assert_eq!(parsed["data"]["total_packets"], 5);

        b.unregister(id);
        assert_eq!(b.client_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients_does_not_panic() {
        let b = Broadcaster::new();
        b.broadcast("packet", json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_full_queue_drops_message_without_disconnecting_client() {
        let b = Broadcaster::new();
        let (_id, mut rx) = b.register();

        for i in 0..(config::CLIENT_QUEUE_CAPACITY + 10) {
            b.broadcast("packet", json!({"id": i}));
        }

        assert_eq!(b.client_count(), 1);
        // Queue is bounded: we can still drain some messages without panicking.
        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert!(drained > 0);
        assert!(drained <= config::CLIENT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_multiple_clients_all_receive_broadcast() {
        let b = Broadcaster::new();
        let (_id1, mut rx1) = b.register();
        let (_id2, mut rx2) = b.register();

        b.broadcast("stats", json!({"v": 1}));

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
