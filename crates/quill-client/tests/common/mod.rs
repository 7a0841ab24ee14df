#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use quill_client::backend::Backend;
use quill_client::channel::{CollabEvent, Subscription};
use quill_client::transport::RealtimeLink;
use quill_client::{ClientError, Result};
use quill_realtime::Dispatcher;
use quill_types::api::{
    AuthResponse, CreateCommentRequest, CreateDocumentRequest, InviteRequest, InviteResponse, LoginRequest,
    PasswordResetConfirm, PasswordResetRequest, RegisterRequest, SessionResponse, ShareRequest,
    UpdateDocumentRequest,
};
use quill_types::events::RealtimeCommand;
use quill_types::models::{Comment, Document, Permission, Role};

pub const ME: &str = "me@example.com";

pub fn document(owner_id: Uuid, title: &str, minutes: i64) -> Document {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes);
    Document {
        id: Uuid::new_v4(),
        owner_id,
        title: title.into(),
        content: String::new(),
        is_public: false,
        version: 1,
        created_at: at,
        updated_at: at,
    }
}

fn api_error(status: u16, message: &str) -> ClientError {
    ClientError::Api {
        status,
        message: message.into(),
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    owned: Vec<Document>,
    shared: Vec<Document>,
    permissions: Vec<Permission>,
    fail_updates: bool,
    reject_sessions: bool,
}

/// In-memory stand-in for the REST API. Records every call by name.
pub struct FakeBackend {
    pub user_id: Uuid,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn record(&self, call: &str) -> std::sync::MutexGuard<'_, FakeState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        state
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn add_owned(&self, title: &str, minutes: i64) -> Document {
        let doc = document(self.user_id, title, minutes);
        self.state.lock().unwrap().owned.push(doc.clone());
        doc
    }

    pub fn add_shared(&self, doc: Document) {
        self.state.lock().unwrap().shared.push(doc);
    }

    pub fn stored(&self, id: Uuid) -> Option<Document> {
        self.state.lock().unwrap().owned.iter().find(|d| d.id == id).cloned()
    }

    /// Simulate a collaborator saving `id`.
    pub fn bump_version(&self, id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state.owned.iter_mut().find(|d| d.id == id) {
            doc.version += 1;
        }
    }

    pub fn fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_updates = fail;
    }

    pub fn reject_sessions(&self) {
        self.state.lock().unwrap().reject_sessions = true;
    }

    fn auth(&self, email: &str) -> AuthResponse {
        AuthResponse {
            user_id: self.user_id,
            email: email.to_string(),
            token: format!("token-for-{}", email),
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse> {
        self.record("register");
        Ok(self.auth(&req.email))
    }

    async fn login(&self, req: &LoginRequest) -> Result<AuthResponse> {
        self.record("login");
        Ok(self.auth(&req.email))
    }

    async fn session(&self, _token: &str) -> Result<SessionResponse> {
        let state = self.record("session");
        if state.reject_sessions {
            return Err(api_error(401, "not authenticated"));
        }
        Ok(SessionResponse {
            user_id: self.user_id,
            email: ME.into(),
            expires_at: Utc::now(),
        })
    }

    async fn logout(&self, _token: &str) -> Result<()> {
        self.record("logout");
        Ok(())
    }

    async fn request_password_reset(&self, _req: &PasswordResetRequest) -> Result<()> {
        self.record("request_password_reset");
        Ok(())
    }

    async fn confirm_password_reset(&self, _req: &PasswordResetConfirm) -> Result<()> {
        self.record("confirm_password_reset");
        Ok(())
    }

    async fn list_owned_documents(&self, _token: &str) -> Result<Vec<Document>> {
        Ok(self.record("list_owned_documents").owned.clone())
    }

    async fn list_shared_documents(&self, _token: &str) -> Result<Vec<Document>> {
        Ok(self.record("list_shared_documents").shared.clone())
    }

    async fn get_document(&self, _token: &str, id: Uuid) -> Result<Document> {
        let state = self.record("get_document");
        state
            .owned
            .iter()
            .chain(&state.shared)
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| api_error(404, "not found"))
    }

    async fn get_public_document(&self, id: Uuid) -> Result<Document> {
        let state = self.record("get_public_document");
        state
            .owned
            .iter()
            .find(|d| d.id == id && d.is_public)
            .cloned()
            .ok_or_else(|| api_error(404, "not found"))
    }

    async fn create_document(&self, _token: &str, req: &CreateDocumentRequest) -> Result<Document> {
        let mut state = self.record("create_document");
        let mut doc = document(self.user_id, &req.title, 0);
        doc.content = req.content.clone();
        doc.updated_at = Utc::now();
        state.owned.push(doc.clone());
        Ok(doc)
    }

    async fn update_document(&self, _token: &str, id: Uuid, req: &UpdateDocumentRequest) -> Result<Document> {
        let mut state = self.record("update_document");
        if state.fail_updates {
            return Err(api_error(500, "internal server error"));
        }
        let doc = state
            .owned
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| api_error(404, "not found"))?;
        if let Some(expected) = req.expected_version {
            if expected != doc.version {
                return Err(api_error(409, "document was changed by someone else"));
            }
        }
        if let Some(title) = &req.title {
            doc.title = title.clone();
        }
        if let Some(content) = &req.content {
            doc.content = content.clone();
        }
        if let Some(is_public) = req.is_public {
            doc.is_public = is_public;
        }
        doc.version += 1;
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn delete_document(&self, _token: &str, id: Uuid) -> Result<()> {
        let mut state = self.record("delete_document");
        let before = state.owned.len();
        state.owned.retain(|d| d.id != id);
        if state.owned.len() == before {
            return Err(api_error(404, "not found"));
        }
        Ok(())
    }

    async fn list_permissions(&self, _token: &str, document_id: Uuid) -> Result<Vec<Permission>> {
        let state = self.record("list_permissions");
        Ok(state
            .permissions
            .iter()
            .filter(|p| p.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn share_document(&self, _token: &str, document_id: Uuid, req: &ShareRequest) -> Result<Permission> {
        let mut state = self.record("share_document");
        let role: Role = req.role.parse().map_err(|_| api_error(400, "invalid role"))?;
        if let Some(existing) = state
            .permissions
            .iter_mut()
            .find(|p| p.document_id == document_id && p.grantee_email == req.email)
        {
            existing.role = role;
            return Ok(existing.clone());
        }
        let permission = Permission {
            id: Uuid::new_v4(),
            document_id,
            grantee_email: req.email.clone(),
            role,
            created_at: Utc::now(),
        };
        state.permissions.push(permission.clone());
        Ok(permission)
    }

    async fn revoke_permission(&self, _token: &str, document_id: Uuid, email: &str) -> Result<()> {
        let mut state = self.record("revoke_permission");
        state
            .permissions
            .retain(|p| !(p.document_id == document_id && p.grantee_email == email));
        Ok(())
    }

    async fn list_comments(&self, _token: &str, _document_id: Uuid) -> Result<Vec<Comment>> {
        self.record("list_comments");
        Ok(Vec::new())
    }

    async fn create_comment(&self, _token: &str, document_id: Uuid, req: &CreateCommentRequest) -> Result<Comment> {
        self.record("create_comment");
        Ok(Comment {
            id: Uuid::new_v4(),
            document_id,
            author_id: self.user_id,
            author_email: ME.into(),
            content: req.content.clone(),
            selection: req.selection,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    async fn delete_comment(&self, _token: &str, _comment_id: Uuid) -> Result<()> {
        self.record("delete_comment");
        Ok(())
    }

    async fn send_invite(&self, token: &str, req: &InviteRequest) -> Result<InviteResponse> {
        self.record("send_invite");
        let share = ShareRequest {
            email: req.email.clone(),
            role: req.role.clone(),
        };
        self.share_document(token, req.document_id, &share).await?;
        Ok(InviteResponse {
            message_id: "msg-1".into(),
        })
    }
}

/// A realtime link served by an in-process hub instead of a WebSocket.
pub async fn hub_link(dispatcher: &Dispatcher, user_id: Uuid) -> RealtimeLink {
    let (conn_id, events) = dispatcher.register_connection(user_id).await;
    let (commands, mut cmd_rx) = mpsc::unbounded_channel::<RealtimeCommand>();
    let hub = dispatcher.clone();

    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                RealtimeCommand::Identify { .. } => {}
                RealtimeCommand::Join { topic } => {
                    hub.join(conn_id, &topic).await;
                }
                RealtimeCommand::Leave { topic } => {
                    hub.leave(conn_id, &topic).await;
                }
                RealtimeCommand::Track { topic, payload } => {
                    hub.track(conn_id, &topic, payload).await;
                }
                RealtimeCommand::Broadcast { topic, event, payload } => {
                    hub.broadcast_from(conn_id, &topic, event, payload).await;
                }
            }
        }
        hub.unregister_connection(conn_id).await;
    });

    RealtimeLink { commands, events }
}

pub async fn next_matching(sub: &mut Subscription, pred: impl Fn(&CollabEvent) -> bool) -> CollabEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = sub.recv().await.expect("channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
