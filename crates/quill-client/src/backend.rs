//! REST access to the quill server.
//!
//! [`Backend`] is the seam between the client core and the network. The
//! store and cache only ever talk to `Arc<dyn Backend>`; [`HttpBackend`] is
//! the production implementation.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use quill_types::api::{
    AuthResponse, CreateCommentRequest, CreateDocumentRequest, ErrorBody, InviteRequest, InviteResponse,
    LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest, SessionResponse, ShareRequest,
    UpdateDocumentRequest,
};
use quill_types::models::{Comment, Document, Permission};

use crate::error::{ClientError, Result};

#[async_trait]
pub trait Backend: Send + Sync {
    async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse>;
    async fn login(&self, req: &LoginRequest) -> Result<AuthResponse>;
    async fn session(&self, token: &str) -> Result<SessionResponse>;
    async fn logout(&self, token: &str) -> Result<()>;
    async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<()>;
    async fn confirm_password_reset(&self, req: &PasswordResetConfirm) -> Result<()>;

    async fn list_owned_documents(&self, token: &str) -> Result<Vec<Document>>;
    async fn list_shared_documents(&self, token: &str) -> Result<Vec<Document>>;
    async fn get_document(&self, token: &str, id: Uuid) -> Result<Document>;
    async fn get_public_document(&self, id: Uuid) -> Result<Document>;
    async fn create_document(&self, token: &str, req: &CreateDocumentRequest) -> Result<Document>;
    async fn update_document(&self, token: &str, id: Uuid, req: &UpdateDocumentRequest) -> Result<Document>;
    async fn delete_document(&self, token: &str, id: Uuid) -> Result<()>;

    async fn list_permissions(&self, token: &str, document_id: Uuid) -> Result<Vec<Permission>>;
    async fn share_document(&self, token: &str, document_id: Uuid, req: &ShareRequest) -> Result<Permission>;
    async fn revoke_permission(&self, token: &str, document_id: Uuid, email: &str) -> Result<()>;

    async fn list_comments(&self, token: &str, document_id: Uuid) -> Result<Vec<Comment>>;
    async fn create_comment(&self, token: &str, document_id: Uuid, req: &CreateCommentRequest) -> Result<Comment>;
    async fn delete_comment(&self, token: &str, comment_id: Uuid) -> Result<()>;

    async fn send_invite(&self, token: &str, req: &InviteRequest) -> Result<InviteResponse>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = || ClientError::Validation(format!("invalid API url: {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut().map_err(|_| invalid())?.pop_if_empty().extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str], token: Option<&str>) -> Result<RequestBuilder> {
        let builder = self.client.request(method, self.endpoint(segments)?);
        Ok(match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }
}

/// Turn a non-success response into `ClientError::Api`, preferring the
/// server's `{"error": ...}` message over the raw body.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    debug!("Request failed with {}: {}", status, message);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
    let resp = check(builder.send().await?).await?;
    Ok(resp.json().await?)
}

async fn send_empty(builder: RequestBuilder) -> Result<()> {
    check(builder.send().await?).await?;
    Ok(())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register(&self, req: &RegisterRequest) -> Result<AuthResponse> {
        send_json(self.request(Method::POST, &["auth", "register"], None)?.json(req)).await
    }

    async fn login(&self, req: &LoginRequest) -> Result<AuthResponse> {
        send_json(self.request(Method::POST, &["auth", "login"], None)?.json(req)).await
    }

    async fn session(&self, token: &str) -> Result<SessionResponse> {
        send_json(self.request(Method::GET, &["auth", "session"], Some(token))?).await
    }

    async fn logout(&self, token: &str) -> Result<()> {
        send_empty(self.request(Method::POST, &["auth", "logout"], Some(token))?).await
    }

    async fn request_password_reset(&self, req: &PasswordResetRequest) -> Result<()> {
        send_empty(self.request(Method::POST, &["auth", "password-reset"], None)?.json(req)).await
    }

    async fn confirm_password_reset(&self, req: &PasswordResetConfirm) -> Result<()> {
        let builder = self.request(Method::POST, &["auth", "password-reset", "confirm"], None)?;
        send_empty(builder.json(req)).await
    }

    async fn list_owned_documents(&self, token: &str) -> Result<Vec<Document>> {
        send_json(self.request(Method::GET, &["documents"], Some(token))?).await
    }

    async fn list_shared_documents(&self, token: &str) -> Result<Vec<Document>> {
        send_json(self.request(Method::GET, &["documents", "shared"], Some(token))?).await
    }

    async fn get_document(&self, token: &str, id: Uuid) -> Result<Document> {
        let id = id.to_string();
        send_json(self.request(Method::GET, &["documents", &id], Some(token))?).await
    }

    async fn get_public_document(&self, id: Uuid) -> Result<Document> {
        let id = id.to_string();
        send_json(self.request(Method::GET, &["public", "documents", &id], None)?).await
    }

    async fn create_document(&self, token: &str, req: &CreateDocumentRequest) -> Result<Document> {
        send_json(self.request(Method::POST, &["documents"], Some(token))?.json(req)).await
    }

    async fn update_document(&self, token: &str, id: Uuid, req: &UpdateDocumentRequest) -> Result<Document> {
        let id = id.to_string();
        send_json(self.request(Method::PATCH, &["documents", &id], Some(token))?.json(req)).await
    }

    async fn delete_document(&self, token: &str, id: Uuid) -> Result<()> {
        let id = id.to_string();
        send_empty(self.request(Method::DELETE, &["documents", &id], Some(token))?).await
    }

    async fn list_permissions(&self, token: &str, document_id: Uuid) -> Result<Vec<Permission>> {
        let id = document_id.to_string();
        send_json(self.request(Method::GET, &["documents", &id, "permissions"], Some(token))?).await
    }

    async fn share_document(&self, token: &str, document_id: Uuid, req: &ShareRequest) -> Result<Permission> {
        let id = document_id.to_string();
        send_json(self.request(Method::PUT, &["documents", &id, "permissions"], Some(token))?.json(req)).await
    }

    async fn revoke_permission(&self, token: &str, document_id: Uuid, email: &str) -> Result<()> {
        let id = document_id.to_string();
        send_empty(self.request(Method::DELETE, &["documents", &id, "permissions", email], Some(token))?).await
    }

    async fn list_comments(&self, token: &str, document_id: Uuid) -> Result<Vec<Comment>> {
        let id = document_id.to_string();
        send_json(self.request(Method::GET, &["documents", &id, "comments"], Some(token))?).await
    }

    async fn create_comment(&self, token: &str, document_id: Uuid, req: &CreateCommentRequest) -> Result<Comment> {
        let id = document_id.to_string();
        send_json(self.request(Method::POST, &["documents", &id, "comments"], Some(token))?.json(req)).await
    }

    async fn delete_comment(&self, token: &str, comment_id: Uuid) -> Result<()> {
        let id = comment_id.to_string();
        send_empty(self.request(Method::DELETE, &["comments", &id], Some(token))?).await
    }

    async fn send_invite(&self, token: &str, req: &InviteRequest) -> Result<InviteResponse> {
        send_json(self.request(Method::POST, &["invites"], Some(token))?.json(req)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_segments_survive_reserved_characters() {
        let backend = HttpBackend::new("http://localhost:3000/");
        let url = backend
            .endpoint(&["documents", "d1", "permissions", "a#b/c?d%e@example.com"])
            .unwrap();
        assert_eq!(url.path(), "/documents/d1/permissions/a%23b%2Fc%3Fd%25e@example.com");
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
    }

    #[test]
    fn base_path_is_kept() {
        let backend = HttpBackend::new("https://quill.example/api");
        assert_eq!(backend.endpoint(&["documents"]).unwrap().as_str(), "https://quill.example/api/documents");
        assert!(HttpBackend::new("not a url").endpoint(&["documents"]).is_err());
    }
}
