//! Session-scoped access to documents, permissions and comments.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use quill_types::api::{
    CreateCommentRequest, CreateDocumentRequest, InviteRequest, LoginRequest, PasswordResetConfirm,
    PasswordResetRequest, RegisterRequest, ShareRequest, UpdateDocumentRequest,
};
use quill_types::models::{Comment, Document, Permission, Role, SelectionRange};
use quill_types::validate::{is_valid_email, normalize_email};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::session::{AuthUser, Session, SessionStore};

const MIN_PASSWORD_LEN: usize = 8;

/// Owned documents plus documents shared with the user, one entry per id
/// (the owned copy wins), most recently updated first.
pub fn merge_documents(owned: Vec<Document>, shared: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::with_capacity(owned.len() + shared.len());
    let mut merged: Vec<Document> = owned
        .into_iter()
        .chain(shared)
        .filter(|doc| seen.insert(doc.id))
        .collect();
    merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    merged
}

fn validated_email(raw: &str) -> Result<String> {
    let email = normalize_email(raw);
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(ClientError::Validation(format!("invalid email address: {}", raw.trim())))
    }
}

pub struct DocumentStore {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionStore>) -> Self {
        Self { backend, session }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    // -- Auth --

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = validated_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ClientError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let resp = self
            .backend
            .register(&RegisterRequest {
                email,
                password: password.to_string(),
            })
            .await?;
        Ok(self.start_session(resp.into()))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let resp = self
            .backend
            .login(&LoginRequest {
                email: normalize_email(email),
                password: password.to_string(),
            })
            .await?;
        Ok(self.start_session(resp.into()))
    }

    fn start_session(&self, session: Session) -> AuthUser {
        info!("Signed in as {}", session.user.email);
        let user = session.user.clone();
        self.session.set(session);
        user
    }

    /// Drops the local session. The server is told, but a failure there does
    /// not keep the user signed in.
    pub async fn sign_out(&self) {
        if let Some(session) = self.session.get() {
            if let Err(e) = self.backend.logout(&session.token).await {
                warn!("Logout request failed: {}", e);
            }
        }
        self.session.clear();
    }

    /// Revalidates the stored token. A token the server no longer accepts
    /// clears the session.
    pub async fn get_session(&self) -> Result<Option<AuthUser>> {
        let Some(session) = self.session.get() else {
            return Ok(None);
        };
        match self.backend.session(&session.token).await {
            Ok(resp) => Ok(Some(AuthUser {
                id: resp.user_id,
                email: resp.email,
            })),
            Err(ClientError::Api { status: 401, .. }) => {
                debug!("Stored session rejected by server");
                self.session.clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = validated_email(email)?;
        self.backend.request_password_reset(&PasswordResetRequest { email }).await
    }

    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ClientError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        self.backend
            .confirm_password_reset(&PasswordResetConfirm {
                token: token.to_string(),
                new_password: new_password.to_string(),
            })
            .await
    }

    // -- Documents --

    pub async fn load_all_documents(&self) -> Result<Vec<Document>> {
        let session = self.session.require()?;
        let (owned, shared) = tokio::try_join!(
            self.backend.list_owned_documents(&session.token),
            self.backend.list_shared_documents(&session.token),
        )?;
        debug!("Loaded {} owned and {} shared documents", owned.len(), shared.len());
        Ok(merge_documents(owned, shared))
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        let session = self.session.require()?;
        self.backend.get_document(&session.token, id).await
    }

    /// Read a document flagged public. Works without a session.
    pub async fn get_public_document(&self, id: Uuid) -> Result<Document> {
        self.backend.get_public_document(id).await
    }

    pub async fn create_document(&self, title: &str, content: &str) -> Result<Document> {
        let session = self.session.require()?;
        let req = CreateDocumentRequest {
            title: title.to_string(),
            content: content.to_string(),
        };
        self.backend.create_document(&session.token, &req).await
    }

    pub async fn update_document(&self, id: Uuid, update: &UpdateDocumentRequest) -> Result<Document> {
        let session = self.session.require()?;
        if update.is_empty() {
            return Err(ClientError::Validation("nothing to update".into()));
        }
        self.backend.update_document(&session.token, id, update).await
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        let session = self.session.require()?;
        self.backend.delete_document(&session.token, id).await
    }

    // -- Sharing --

    pub async fn list_permissions(&self, document_id: Uuid) -> Result<Vec<Permission>> {
        let session = self.session.require()?;
        self.backend.list_permissions(&session.token, document_id).await
    }

    /// Grant `role` to `email`, or change the role of an existing grant.
    pub async fn share(&self, document_id: Uuid, email: &str, role: Role) -> Result<Permission> {
        let session = self.session.require()?;
        let email = self.grantee_email(&session, email)?;
        let req = ShareRequest {
            email,
            role: role.to_string(),
        };
        self.backend.share_document(&session.token, document_id, &req).await
    }

    pub async fn revoke(&self, document_id: Uuid, email: &str) -> Result<()> {
        let session = self.session.require()?;
        self.backend
            .revoke_permission(&session.token, document_id, &normalize_email(email))
            .await
    }

    /// Share and email the grantee a link. Returns the provider's message id.
    pub async fn invite(&self, document_id: Uuid, email: &str, role: Role) -> Result<String> {
        let session = self.session.require()?;
        let email = self.grantee_email(&session, email)?;
        let req = InviteRequest {
            document_id,
            email,
            role: role.to_string(),
        };
        let resp = self.backend.send_invite(&session.token, &req).await?;
        info!("Invitation for {} sent as {}", document_id, resp.message_id);
        Ok(resp.message_id)
    }

    fn grantee_email(&self, session: &Session, raw: &str) -> Result<String> {
        let email = validated_email(raw)?;
        if email == normalize_email(&session.user.email) {
            return Err(ClientError::Validation("you already own this document".into()));
        }
        Ok(email)
    }

    // -- Comments --

    pub async fn list_comments(&self, document_id: Uuid) -> Result<Vec<Comment>> {
        let session = self.session.require()?;
        self.backend.list_comments(&session.token, document_id).await
    }

    pub async fn add_comment(
        &self,
        document_id: Uuid,
        content: &str,
        selection: Option<SelectionRange>,
    ) -> Result<Comment> {
        let session = self.session.require()?;
        if content.trim().is_empty() {
            return Err(ClientError::Validation("comment is empty".into()));
        }
        let req = CreateCommentRequest {
            content: content.to_string(),
            selection,
        };
        self.backend.create_comment(&session.token, document_id, &req).await
    }

    pub async fn delete_comment(&self, comment_id: Uuid) -> Result<()> {
        let session = self.session.require()?;
        self.backend.delete_comment(&session.token, comment_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn doc(id: Uuid, title: &str, minutes: i64) -> Document {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Document {
            id,
            owner_id: Uuid::new_v4(),
            title: title.into(),
            content: String::new(),
            is_public: false,
            version: 1,
            created_at: base,
            updated_at: base + Duration::minutes(minutes),
        }
    }

    #[test]
    fn merge_dedups_and_sorts_newest_first() {
        let dup = Uuid::new_v4();
        let owned = vec![doc(Uuid::new_v4(), "a", 1), doc(dup, "owned copy", 5)];
        let shared = vec![doc(dup, "shared copy", 9), doc(Uuid::new_v4(), "b", 3), doc(Uuid::new_v4(), "c", 7)];

        let merged = merge_documents(owned, shared);
        let titles: Vec<&str> = merged.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["c", "owned copy", "b", "a"]);
    }

    #[test]
    fn merge_of_disjoint_lists_keeps_everything() {
        let owned: Vec<_> = (0..3).map(|i| doc(Uuid::new_v4(), "o", i)).collect();
        let shared: Vec<_> = (0..4).map(|i| doc(Uuid::new_v4(), "s", 10 + i)).collect();
        let merged = merge_documents(owned, shared);
        assert_eq!(merged.len(), 7);
        assert!(merged.windows(2).all(|w| w[0].updated_at >= w[1].updated_at));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_documents(Vec::new(), Vec::new()).is_empty());
    }
}
