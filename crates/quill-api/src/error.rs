use axum::{
    Json,
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use quill_types::api::ErrorBody;

/// Every way a request can fail. Each variant maps to one status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: bad email, unknown role, empty body.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid session token, or bad credentials.
    #[error("not authenticated")]
    Unauthorized,

    /// Authenticated, but the caller's role does not allow the operation.
    #[error("{0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    /// Unique violation or stale `expected_version`.
    #[error("{0}")]
    Conflict(String),

    /// Server is missing configuration the operation needs (API keys etc).
    #[error("server misconfigured: {0}")]
    Config(String),

    /// A third-party provider failed.
    #[error("upstream provider error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
            Self::Config(_) | Self::Upstream(_) => {
                error!("{}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };
        if status.is_client_error() {
            warn!("{} {}", status.as_u16(), message);
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e))
    }
}

/// `Json` extractor whose rejections are reported as validation errors.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Router fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
