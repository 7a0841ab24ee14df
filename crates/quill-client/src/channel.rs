//! Per-document collaboration channel.
//!
//! One [`CollaborationChannel`] wraps one realtime link. Joining a document
//! subscribes to its topic and, once the server confirms, tracks the local
//! user's presence. Incoming presence and broadcast traffic is turned into
//! [`CollabEvent`]s and fanned out to every live [`Subscription`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use quill_types::events::{
    CHAT_EVENT, CURSOR_EVENT, DOCUMENT_SAVED_EVENT, PresenceState, RealtimeCommand, RealtimeEvent, document_topic,
};
use quill_types::models::{ChatMessage, ChatRole, CursorBroadcast, CursorRect, PresenceEntry};

use crate::color::user_color;
use crate::cursors::RemoteCursors;
use crate::error::{ClientError, Result};
use crate::session::AuthUser;
use crate::transport::RealtimeLink;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStatus {
    /// Not in any document.
    Idle,
    /// Join sent, waiting for the server.
    Joining,
    Joined,
    /// The server refused the join. Presence was never announced.
    Failed(String),
    /// The realtime link went away.
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    /// Full online-user list, recomputed on every presence sync.
    OnlineUsers(Vec<PresenceEntry>),
    RemoteCursor(CursorBroadcast),
    /// Remote chat, plus the local user's own messages echoed on send.
    Chat(ChatMessage),
    /// A collaborator saved the open document.
    DocumentSaved { version: i64, saved_by: Uuid },
    StatusChanged(ChannelStatus),
}

/// One entry per presence key, earliest join first when a user has several
/// connections. Payloads that are not presence entries are skipped.
pub fn online_users(state: &PresenceState) -> Vec<PresenceEntry> {
    let mut users: Vec<PresenceEntry> = state
        .values()
        .filter_map(|metas| {
            metas
                .iter()
                .filter_map(|meta| serde_json::from_value::<PresenceEntry>(meta.clone()).ok())
                .min_by_key(|entry| entry.joined_at)
        })
        .collect();
    users.sort_by(|a, b| a.email.cmp(&b.email));
    users
}

#[derive(Deserialize)]
struct SavedNotice {
    version: i64,
    saved_by: Uuid,
}

struct Membership {
    topic: String,
    user: AuthUser,
}

struct ChannelState {
    membership: Option<Membership>,
    status: ChannelStatus,
    online: Vec<PresenceEntry>,
    cursors: RemoteCursors,
}

struct Shared {
    state: Mutex<ChannelState>,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<CollabEvent>>>,
    next_subscriber: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                membership: None,
                status: ChannelStatus::Idle,
                online: Vec::new(),
                cursors: RemoteCursors::new(Uuid::nil()),
            }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        }
    }

    fn emit(&self, event: CollabEvent) {
        lock(&self.subscribers).retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&self, status: ChannelStatus) {
        lock(&self.state).status = status.clone();
        self.emit(CollabEvent::StatusChanged(status));
    }

    fn drop_membership(&self) {
        let mut st = lock(&self.state);
        st.membership = None;
        st.online.clear();
        st.cursors.clear();
    }

    /// The local user, if `topic` is the topic we are in.
    fn member_of(&self, topic: &str) -> Option<AuthUser> {
        lock(&self.state)
            .membership
            .as_ref()
            .filter(|m| m.topic == topic)
            .map(|m| m.user.clone())
    }

    fn handle_event(&self, event: RealtimeEvent, commands: &mpsc::UnboundedSender<RealtimeCommand>) {
        let Some(topic) = event.topic().map(str::to_owned) else {
            return;
        };
        let Some(local) = self.member_of(&topic) else {
            trace!("Ignoring event for {}", topic);
            return;
        };

        match event {
            RealtimeEvent::Subscribed { topic } => {
                let entry = PresenceEntry {
                    user_id: local.id,
                    email: local.email.clone(),
                    joined_at: Utc::now(),
                };
                match serde_json::to_value(&entry) {
                    Ok(payload) => {
                        if commands.send(RealtimeCommand::Track { topic: topic.clone(), payload }).is_err() {
                            warn!("Presence for {} not sent: connection closed", topic);
                            self.drop_membership();
                            self.set_status(ChannelStatus::Closed);
                            return;
                        }
                    }
                    Err(e) => warn!("Failed to encode presence for {}: {}", topic, e),
                }
                info!("Joined {}", topic);
                self.set_status(ChannelStatus::Joined);
            }
            RealtimeEvent::SubscribeFailed { topic, reason } => {
                warn!("Join of {} refused: {}", topic, reason);
                lock(&self.state).membership = None;
                self.set_status(ChannelStatus::Failed(reason));
            }
            RealtimeEvent::PresenceSync { state, .. } => {
                let users = online_users(&state);
                let present: HashSet<Uuid> = users.iter().map(|u| u.user_id).collect();
                {
                    let mut st = lock(&self.state);
                    st.online = users.clone();
                    st.cursors.retain_present(&present);
                }
                self.emit(CollabEvent::OnlineUsers(users));
            }
            RealtimeEvent::PresenceJoin { key, .. } => debug!("{} joined {}", key, topic),
            RealtimeEvent::PresenceLeave { key, .. } => debug!("{} left {}", key, topic),
            RealtimeEvent::Broadcast { event, payload, .. } => self.handle_broadcast(&local, &event, payload),
            RealtimeEvent::Ready { .. } => {}
        }
    }

    /// Remote traffic only: anything carrying the local user's id is dropped.
    fn handle_broadcast(&self, local: &AuthUser, event: &str, payload: Value) {
        match event {
            CURSOR_EVENT => match serde_json::from_value::<CursorBroadcast>(payload) {
                Ok(cursor) if cursor.user_id != local.id => {
                    lock(&self.state).cursors.apply(cursor.clone());
                    self.emit(CollabEvent::RemoteCursor(cursor));
                }
                Ok(_) => {}
                Err(e) => warn!("Malformed cursor broadcast: {}", e),
            },
            CHAT_EVENT => match serde_json::from_value::<ChatMessage>(payload) {
                Ok(message) if message.user_id != local.id => self.emit(CollabEvent::Chat(message)),
                Ok(_) => {}
                Err(e) => warn!("Malformed chat broadcast: {}", e),
            },
            DOCUMENT_SAVED_EVENT => match serde_json::from_value::<SavedNotice>(payload) {
                Ok(notice) if notice.saved_by != local.id => self.emit(CollabEvent::DocumentSaved {
                    version: notice.version,
                    saved_by: notice.saved_by,
                }),
                Ok(_) => {}
                Err(e) => warn!("Malformed save notice: {}", e),
            },
            other => trace!("Ignoring broadcast '{}'", other),
        }
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<RealtimeEvent>,
    commands: mpsc::UnboundedSender<RealtimeCommand>,
    shared: Arc<Shared>,
) {
    while let Some(event) = events.recv().await {
        shared.handle_event(event, &commands);
    }
    debug!("Realtime link closed");
    shared.drop_membership();
    shared.set_status(ChannelStatus::Closed);
}

/// Receives [`CollabEvent`]s until dropped.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<CollabEvent>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<CollabEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<CollabEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).remove(&self.id);
        }
    }
}

pub struct CollaborationChannel {
    commands: mpsc::UnboundedSender<RealtimeCommand>,
    shared: Arc<Shared>,
    pump: JoinHandle<()>,
}

impl CollaborationChannel {
    pub fn new(link: RealtimeLink) -> Self {
        let shared = Arc::new(Shared::new());
        let pump = tokio::spawn(pump_events(link.events, link.commands.clone(), shared.clone()));
        Self {
            commands: link.commands,
            shared,
            pump,
        }
    }

    fn send(&self, cmd: RealtimeCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| ClientError::Realtime("realtime connection closed".into()))
    }

    /// Join the topic of `document_id` as `user`, leaving any current one.
    /// Does nothing and returns `false` when either is missing.
    pub fn join(&self, document_id: Option<Uuid>, user: Option<&AuthUser>) -> Result<bool> {
        let (Some(document_id), Some(user)) = (document_id, user) else {
            debug!("Join skipped: no document or no user");
            return Ok(false);
        };
        self.leave();

        let topic = document_topic(document_id);
        {
            let mut st = lock(&self.shared.state);
            st.membership = Some(Membership {
                topic: topic.clone(),
                user: user.clone(),
            });
            st.cursors = RemoteCursors::new(user.id);
        }
        self.shared.set_status(ChannelStatus::Joining);
        if let Err(e) = self.send(RealtimeCommand::Join { topic }) {
            self.shared.drop_membership();
            self.shared.set_status(ChannelStatus::Closed);
            return Err(e);
        }
        Ok(true)
    }

    /// Leave the current topic. Safe to call repeatedly.
    pub fn leave(&self) {
        let left = {
            let mut st = lock(&self.shared.state);
            st.online.clear();
            st.cursors.clear();
            st.membership.take()
        };
        let Some(membership) = left else {
            return;
        };

        if self.send(RealtimeCommand::Leave { topic: membership.topic.clone() }).is_err() {
            debug!("Leave of {} not sent: connection closed", membership.topic);
        }
        info!("Left {}", membership.topic);
        self.shared.set_status(ChannelStatus::Idle);
    }

    fn joined(&self) -> Option<(String, AuthUser)> {
        let st = lock(&self.shared.state);
        match (&st.membership, &st.status) {
            (Some(m), ChannelStatus::Joined) => Some((m.topic.clone(), m.user.clone())),
            _ => None,
        }
    }

    /// Broadcast the local selection rectangle. Fire-and-forget; a no-op
    /// until the join is confirmed.
    pub fn send_cursor(&self, rect: CursorRect) -> Result<()> {
        let Some((topic, user)) = self.joined() else {
            return Ok(());
        };
        let cursor = CursorBroadcast {
            user_id: user.id,
            color: user_color(user.id).to_string(),
            rect,
        };
        self.send(RealtimeCommand::Broadcast {
            topic,
            event: CURSOR_EVENT.to_string(),
            payload: serde_json::to_value(&cursor)?,
        })
    }

    /// Broadcast a chat message. Local subscribers get it immediately.
    pub fn send_chat(&self, text: &str, role: ChatRole) -> Result<ChatMessage> {
        let Some((topic, user)) = self.joined() else {
            return Err(ClientError::Realtime("not joined to a document".into()));
        };
        let message = ChatMessage {
            user_id: user.id,
            email: user.email,
            text: text.to_string(),
            role,
            timestamp: Utc::now(),
        };

        self.shared.emit(CollabEvent::Chat(message.clone()));
        self.send(RealtimeCommand::Broadcast {
            topic,
            event: CHAT_EVENT.to_string(),
            payload: serde_json::to_value(&message)?,
        })?;
        Ok(message)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.subscribers).insert(id, tx);
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        lock(&self.shared.state).status.clone()
    }

    pub fn topic(&self) -> Option<String> {
        lock(&self.shared.state).membership.as_ref().map(|m| m.topic.clone())
    }

    pub fn online_users(&self) -> Vec<PresenceEntry> {
        lock(&self.shared.state).online.clone()
    }

    pub fn remote_cursors(&self) -> Vec<CursorBroadcast> {
        lock(&self.shared.state).cursors.snapshot()
    }
}

impl Drop for CollaborationChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
