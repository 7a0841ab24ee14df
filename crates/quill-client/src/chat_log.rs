use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use quill_types::models::ChatMessage;

use crate::error::Result;

/// Messages kept per (user, document) log.
pub const MAX_MESSAGES: usize = 100;

/// Local chat history, one JSON file per (user, document). Chat is never
/// stored server-side.
#[derive(Debug, Clone)]
pub struct ChatLog {
    dir: PathBuf,
}

impl ChatLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, user_id: Uuid, document_id: Uuid) -> PathBuf {
        self.dir.join(format!("chat_{}_{}.json", user_id, document_id))
    }

    /// Oldest first. A missing log is an empty history.
    pub async fn load(&self, user_id: Uuid, document_id: Uuid) -> Result<Vec<ChatMessage>> {
        match tokio::fs::read(self.path(user_id, document_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one message, dropping the oldest beyond [`MAX_MESSAGES`].
    pub async fn append(&self, user_id: Uuid, document_id: Uuid, message: &ChatMessage) -> Result<()> {
        let mut messages = self.load(user_id, document_id).await?;
        messages.push(message.clone());
        if messages.len() > MAX_MESSAGES {
            messages.drain(..messages.len() - MAX_MESSAGES);
        }

        let path = self.path(user_id, document_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, serde_json::to_vec(&messages)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Chat log for {} now holds {} messages", document_id, messages.len());
        Ok(())
    }

    pub async fn clear(&self, user_id: Uuid, document_id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.path(user_id, document_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
