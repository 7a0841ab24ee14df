use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use quill_types::events::{PresenceState, RealtimeEvent};

/// One open gateway connection.
struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Topic {
    members: HashSet<Uuid>,
    /// Tracked presence in insertion order: (conn_id, key, payload).
    presence: Vec<(Uuid, String, Value)>,
}

impl Topic {
    fn state(&self) -> PresenceState {
        let mut state = PresenceState::new();
        for (_, key, payload) in &self.presence {
            state.entry(key.clone()).or_default().push(payload.clone());
        }
        state
    }

    fn untrack(&mut self, conn_id: Uuid) -> Option<(String, Value)> {
        let idx = self.presence.iter().position(|(cid, _, _)| *cid == conn_id)?;
        let (_, key, payload) = self.presence.remove(idx);
        Some((key, payload))
    }
}

#[derive(Default)]
struct HubState {
    connections: HashMap<Uuid, ConnectionHandle>,
    topics: HashMap<String, Topic>,
}

impl HubState {
    fn send(&self, conn_id: Uuid, event: RealtimeEvent) {
        if let Some(conn) = self.connections.get(&conn_id) {
            let _ = conn.tx.send(event);
        }
    }

    fn fan_out(&self, topic: &str, event: &RealtimeEvent, except: Option<Uuid>) -> usize {
        let Some(t) = self.topics.get(topic) else {
            return 0;
        };
        let mut delivered = 0;
        for &member in &t.members {
            if Some(member) == except {
                continue;
            }
            if let Some(conn) = self.connections.get(&member) {
                if conn.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn sync_event(&self, topic: &str) -> RealtimeEvent {
        RealtimeEvent::PresenceSync {
            topic: topic.to_string(),
            state: self.topics.get(topic).map(Topic::state).unwrap_or_default(),
        }
    }

    /// Removes `conn_id` from `topic`, announcing its presence leave to the
    /// remaining members. Empty topics are dropped.
    fn remove_member(&mut self, conn_id: Uuid, topic: &str) -> bool {
        let Some(t) = self.topics.get_mut(topic) else {
            return false;
        };
        if !t.members.remove(&conn_id) {
            return false;
        }
        let left = t.untrack(conn_id);
        let empty = t.members.is_empty();

        if empty {
            self.topics.remove(topic);
        } else if let Some((key, payload)) = left {
            let leave = RealtimeEvent::PresenceLeave {
                topic: topic.to_string(),
                key,
                payload,
            };
            self.fan_out(topic, &leave, None);
            let sync = self.sync_event(topic);
            self.fan_out(topic, &sync, None);
        }
        true
    }
}

/// Manages all connected clients, topic membership and presence.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<HubState>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns (conn_id, receiver of events for it).
    pub async fn register_connection(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            ConnectionHandle {
                user_id,
                tx,
                topics: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection, leaving every topic it joined.
    pub async fn unregister_connection(&self, conn_id: Uuid) {
        let mut state = self.inner.write().await;
        let Some(conn) = state.connections.remove(&conn_id) else {
            return;
        };
        for topic in &conn.topics {
            state.remove_member(conn_id, topic);
        }
        debug!("Connection {} for user {} unregistered", conn_id, conn.user_id);
    }

    /// Send an event to one connection.
    pub async fn send_to(&self, conn_id: Uuid, event: RealtimeEvent) {
        self.inner.read().await.send(conn_id, event);
    }

    /// Add a connection to a topic. The joiner receives `Subscribed` followed
    /// by the current presence state. Joining twice is harmless.
    pub async fn join(&self, conn_id: Uuid, topic: &str) -> bool {
        let mut state = self.inner.write().await;
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        conn.topics.insert(topic.to_string());
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .members
            .insert(conn_id);

        state.send(conn_id, RealtimeEvent::Subscribed { topic: topic.to_string() });
        let sync = state.sync_event(topic);
        state.send(conn_id, sync);
        true
    }

    /// Remove a connection from a topic. Idempotent.
    pub async fn leave(&self, conn_id: Uuid, topic: &str) -> bool {
        let mut state = self.inner.write().await;
        if let Some(conn) = state.connections.get_mut(&conn_id) {
            conn.topics.remove(topic);
        }
        state.remove_member(conn_id, topic)
    }

    /// Track `payload` for this connection under its user id. A second track
    /// from the same connection replaces the first.
    pub async fn track(&self, conn_id: Uuid, topic: &str, payload: Value) -> bool {
        let mut state = self.inner.write().await;
        let Some(user_id) = state.connections.get(&conn_id).map(|c| c.user_id) else {
            return false;
        };
        let Some(t) = state.topics.get_mut(topic) else {
            warn!("Connection {} tracked on {} without joining", conn_id, topic);
            return false;
        };
        if !t.members.contains(&conn_id) {
            warn!("Connection {} tracked on {} without joining", conn_id, topic);
            return false;
        }

        let key = user_id.to_string();
        t.untrack(conn_id);
        t.presence.push((conn_id, key.clone(), payload.clone()));

        let join = RealtimeEvent::PresenceJoin {
            topic: topic.to_string(),
            key,
            payload,
        };
        state.fan_out(topic, &join, None);
        let sync = state.sync_event(topic);
        state.fan_out(topic, &sync, None);
        true
    }

    /// Relay a broadcast from a member to every other member of the topic.
    /// Returns how many connections it was delivered to.
    pub async fn broadcast_from(&self, conn_id: Uuid, topic: &str, event: String, payload: Value) -> usize {
        let state = self.inner.read().await;
        let is_member = state
            .topics
            .get(topic)
            .is_some_and(|t| t.members.contains(&conn_id));
        if !is_member {
            warn!("Connection {} broadcast on {} without joining", conn_id, topic);
            return 0;
        }

        let event = RealtimeEvent::Broadcast {
            topic: topic.to_string(),
            event,
            payload,
        };
        state.fan_out(topic, &event, Some(conn_id))
    }

    /// Server-originated broadcast to every member of a topic.
    pub async fn publish(&self, topic: &str, event: &str, payload: Value) -> usize {
        let event = RealtimeEvent::Broadcast {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        };
        self.inner.read().await.fan_out(topic, &event, None)
    }

    /// Current aggregate presence of a topic.
    pub async fn presence_state(&self, topic: &str) -> PresenceState {
        self.inner
            .read()
            .await
            .topics
            .get(topic)
            .map(Topic::state)
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
