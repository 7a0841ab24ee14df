pub mod auth;
pub mod comments;
pub mod documents;
pub mod email;
pub mod error;
pub mod invites;
pub mod middleware;
pub mod permissions;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use quill_db::Database;
use quill_realtime::Dispatcher;

use crate::email::EmailSender;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    /// `None` when no email provider key is configured.
    pub mailer: Option<Arc<dyn EmailSender>>,
    /// Base URL used to build links in outgoing emails.
    pub public_url: String,
}

impl AppStateInner {
    pub fn mailer(&self) -> Result<&Arc<dyn EmailSender>, ApiError> {
        self.mailer
            .as_ref()
            .ok_or_else(|| ApiError::Config("email provider API key is not set".into()))
    }

    pub fn document_link(&self, document_id: uuid::Uuid) -> String {
        format!("{}/documents/{}", self.public_url.trim_end_matches('/'), document_id)
    }
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || f(&db)).await?;
    Ok(result?)
}

/// REST routes. The realtime gateway lives in `quill_realtime::router`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/password-reset", post(auth::request_password_reset))
        .route("/auth/password-reset/confirm", post(auth::confirm_password_reset))
        .route("/public/documents/{document_id}", get(documents::get_public_document))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/session", get(auth::session))
        .route("/auth/logout", post(auth::logout))
        .route("/documents", get(documents::list_owned).post(documents::create_document))
        .route("/documents/shared", get(documents::list_shared))
        .route(
            "/documents/{document_id}",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route(
            "/documents/{document_id}/permissions",
            get(permissions::list_permissions).put(permissions::share_document),
        )
        .route(
            "/documents/{document_id}/permissions/{email}",
            delete(permissions::revoke_permission),
        )
        .route(
            "/documents/{document_id}/comments",
            get(comments::list_comments).post(comments::create_comment),
        )
        .route("/comments/{comment_id}", delete(comments::delete_comment))
        .route("/invites", post(invites::send_invite))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(error::not_found)
}

async fn health() -> &'static str {
    "ok"
}
