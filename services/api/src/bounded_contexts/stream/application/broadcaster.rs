use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::shared::infrastructure::metrics::Metrics;

/// Wire shape of a participant event pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub stream_session_id: Uuid,
    pub participant_id: String,
    pub user_did: String,
    pub timestamp: DateTime<Utc>,
    pub is_reconnection: bool,
    pub active_count: i32,
}

pub const PARTICIPANT_JOINED: &str = "participant_joined";
pub const PARTICIPANT_LEFT: &str = "participant_left";

/// Per-session fan-out of participant events. Writes are best-effort: a
/// subscriber whose channel is gone is unsubscribed on the next broadcast.
pub struct EventBroadcaster {
    sessions: Mutex<HashMap<Uuid, Vec<mpsc::UnboundedSender<String>>>>,
    metrics: Arc<Metrics>,
}

impl EventBroadcaster {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Register a subscriber; drop the receiver to unsubscribe.
    pub fn subscribe(&self, session_id: Uuid) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id)
            .or_default()
            .push(tx);
        rx
    }

    pub fn broadcast(&self, session_id: Uuid, message: &BroadcastMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize broadcast message");
                return;
            }
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = sessions.get_mut(&session_id) else {
            return;
        };

        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        let dropped = before - subscribers.len();
        if dropped > 0 {
            self.metrics
                .broadcast_dropped_connections_total
                .inc_by(dropped as u64);
        }
        self.metrics
            .broadcast_messages_total
            .inc_by(subscribers.len() as u64);

        if subscribers.is_empty() {
            sessions.remove(&session_id);
        }
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(session_id: Uuid) -> BroadcastMessage {
        BroadcastMessage {
            event_type: PARTICIPANT_JOINED,
            stream_session_id: session_id,
            participant_id: "user-abc".into(),
            user_did: "did:plc:abc".into(),
            timestamp: Utc::now(),
            is_reconnection: false,
            active_count: 1,
        }
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let broadcaster = EventBroadcaster::new(Arc::new(Metrics::new()));
        let session_id = Uuid::new_v4();
        let mut rx1 = broadcaster.subscribe(session_id);
        let mut rx2 = broadcaster.subscribe(session_id);

        broadcaster.broadcast(session_id, &message(session_id));

        let received = rx1.recv().await.unwrap();
        assert!(received.contains("participant_joined"));
        assert!(received.contains("user-abc"));
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn prunes_dead_subscribers_on_write() {
        let broadcaster = EventBroadcaster::new(Arc::new(Metrics::new()));
        let session_id = Uuid::new_v4();
        let rx = broadcaster.subscribe(session_id);
        drop(rx);

        broadcaster.broadcast(session_id, &message(session_id));
        assert_eq!(broadcaster.subscriber_count(session_id), 0);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let broadcaster = EventBroadcaster::new(Arc::new(Metrics::new()));
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut rx_a = broadcaster.subscribe(session_a);
        let mut rx_b = broadcaster.subscribe(session_b);

        broadcaster.broadcast(session_a, &message(session_a));

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }
}
