//! Application state for one signed-in client.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use quill_types::models::{ChatMessage, ChatRole, CursorRect, Document};

use crate::backend::{Backend, HttpBackend};
use crate::cache::DocumentCache;
use crate::channel::{ChannelStatus, CollabEvent, CollaborationChannel, Subscription};
use crate::chat_log::ChatLog;
use crate::error::{ClientError, Result};
use crate::session::{AuthUser, SessionStore};
use crate::store::DocumentStore;
use crate::transport::{self, RealtimeLink};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `http://localhost:3000`.
    pub api_url: String,
    /// Realtime gateway; `http(s)://` is rewritten to `ws(s)://`.
    pub gateway_url: String,
    pub chat_log_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            gateway_url: format!("{}/gateway", api_url),
            api_url,
            chat_log_dir: PathBuf::from("quill-chat"),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}

pub struct AppContext {
    config: ClientConfig,
    session: Arc<SessionStore>,
    store: Arc<DocumentStore>,
    cache: DocumentCache,
    chat_log: ChatLog,
    current_document: Mutex<Option<Uuid>>,
    channel: tokio::sync::Mutex<Option<CollaborationChannel>>,
    chat_recorder: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    pub fn new(config: ClientConfig) -> Self {
        let backend = Arc::new(HttpBackend::new(config.api_url.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: ClientConfig, backend: Arc<dyn Backend>) -> Self {
        let session = Arc::new(SessionStore::new());
        let store = Arc::new(DocumentStore::new(backend, session.clone()));
        Self {
            cache: DocumentCache::new(store.clone()),
            chat_log: ChatLog::new(config.chat_log_dir.clone()),
            config,
            session,
            store,
            current_document: Mutex::new(None),
            channel: tokio::sync::Mutex::new(None),
            chat_recorder: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    pub fn current_document(&self) -> Option<Uuid> {
        *self.current_document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current_document(&self, id: Option<Uuid>) {
        *self.current_document.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Sign in and load the document list.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.store.sign_in(email, password).await?;
        self.cache.refresh().await?;
        Ok(user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let user = self.store.sign_up(email, password).await?;
        self.cache.refresh().await?;
        Ok(user)
    }

    /// Close the open document, drop the realtime link and forget the user.
    pub async fn sign_out(&self) {
        self.close_document().await;
        self.channel.lock().await.take();
        self.cache.clear();
        self.store.sign_out().await;
    }

    /// Use an already established realtime link instead of dialing the
    /// gateway on the next `open_document`.
    pub async fn attach_channel(&self, link: RealtimeLink) {
        *self.channel.lock().await = Some(CollaborationChannel::new(link));
    }

    /// Make `id` the current document and join its collaboration topic.
    pub async fn open_document(&self, id: Uuid) -> Result<Document> {
        let session = self.session.require()?;
        let document = self.cache.reload(id).await?;

        let mut channel = self.channel.lock().await;
        let link_lost = channel.as_ref().is_none_or(|c| c.status() == ChannelStatus::Closed);
        if link_lost {
            channel.take();
            let (link, _) = transport::connect(&self.config.gateway_url, &session.token).await?;
            *channel = Some(CollaborationChannel::new(link));
        }
        let Some(channel) = channel.as_ref() else {
            return Err(ClientError::Realtime("no realtime channel".into()));
        };

        self.stop_chat_recorder();
        channel.join(Some(id), Some(&session.user))?;
        self.set_current_document(Some(id));
        self.start_chat_recorder(channel.subscribe(), session.user.id, id);

        info!("Opened document {}", id);
        Ok(document)
    }

    pub async fn close_document(&self) {
        self.stop_chat_recorder();
        if let Some(channel) = self.channel.lock().await.as_ref() {
            channel.leave();
        }
        self.set_current_document(None);
    }

    /// Persist every chat message seen on the channel, local echoes included.
    fn start_chat_recorder(&self, mut subscription: Subscription, user_id: Uuid, document_id: Uuid) {
        let log = self.chat_log.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let CollabEvent::Chat(message) = event {
                    if let Err(e) = log.append(user_id, document_id, &message).await {
                        warn!("Failed to record chat for {}: {}", document_id, e);
                    }
                }
            }
        });
        *self.chat_recorder.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn stop_chat_recorder(&self) {
        if let Some(handle) = self.chat_recorder.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }

    pub async fn subscribe(&self) -> Option<Subscription> {
        self.channel.lock().await.as_ref().map(CollaborationChannel::subscribe)
    }

    pub async fn send_chat(&self, text: &str, role: ChatRole) -> Result<ChatMessage> {
        match self.channel.lock().await.as_ref() {
            Some(channel) => channel.send_chat(text, role),
            None => Err(ClientError::Realtime("no realtime channel".into())),
        }
    }

    pub async fn send_cursor(&self, rect: CursorRect) -> Result<()> {
        match self.channel.lock().await.as_ref() {
            Some(channel) => channel.send_cursor(rect),
            None => Ok(()),
        }
    }

    /// Stored chat of the current document for the signed-in user.
    pub async fn chat_history(&self) -> Result<Vec<ChatMessage>> {
        let user = self.session.require()?.user;
        let Some(document_id) = self.current_document() else {
            return Ok(Vec::new());
        };
        self.chat_log.load(user.id, document_id).await
    }
}
