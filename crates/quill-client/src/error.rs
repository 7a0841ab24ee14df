use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A mutating call was attempted without a session. No request was sent.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Rejected locally before reaching the server.
    #[error("{0}")]
    Validation(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("realtime: {0}")]
    Realtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Someone else saved the document after our cached version.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
