//! In-memory mirror of the signed-in user's documents.
//!
//! Title and content edits are applied locally first and saved in the
//! background. A failed save is logged and its document id lands in
//! [`DocumentCache::failed_saves`]; the local edit stays in place. Saves
//! are serialized and always carry the cached version, so the server
//! rejects a save that raced with someone else's.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use quill_types::api::UpdateDocumentRequest;
use quill_types::models::Document;

use crate::error::{ClientError, Result};
use crate::store::DocumentStore;

#[derive(Clone, Copy)]
enum Field {
    Title,
    Content,
}

#[derive(Default)]
struct CacheState {
    documents: Mutex<Vec<Document>>,
    failed_saves: Mutex<HashSet<Uuid>>,
    save_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheState {
    /// Build the save request from the current cached record, not from the
    /// edit that triggered it, so a later save never writes older text.
    fn pending_update(&self, id: Uuid, field: Field) -> Option<UpdateDocumentRequest> {
        let docs = lock(&self.documents);
        let doc = docs.iter().find(|d| d.id == id)?;
        let mut req = UpdateDocumentRequest {
            expected_version: Some(doc.version),
            ..Default::default()
        };
        match field {
            Field::Title => req.title = Some(doc.title.clone()),
            Field::Content => req.content = Some(doc.content.clone()),
        }
        Some(req)
    }

    async fn save(&self, store: &DocumentStore, id: Uuid, field: Field) {
        let _guard = self.save_lock.lock().await;
        let Some(req) = self.pending_update(id, field) else {
            debug!("Document {} left the cache before it was saved", id);
            return;
        };

        match store.update_document(id, &req).await {
            Ok(saved) => {
                if let Some(doc) = lock(&self.documents).iter_mut().find(|d| d.id == id) {
                    doc.version = saved.version;
                    doc.updated_at = saved.updated_at;
                }
                lock(&self.failed_saves).remove(&id);
                debug!("Saved document {} at version {}", id, saved.version);
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("Document {} was changed elsewhere; local edit not saved", id);
                } else {
                    warn!("Saving document {} failed: {}", id, e);
                }
                lock(&self.failed_saves).insert(id);
            }
        }
    }
}

#[derive(Clone)]
pub struct DocumentCache {
    store: Arc<DocumentStore>,
    state: Arc<CacheState>,
}

impl DocumentCache {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            state: Arc::new(CacheState::default()),
        }
    }

    pub fn documents(&self) -> Vec<Document> {
        lock(&self.state.documents).clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Document> {
        lock(&self.state.documents).iter().find(|d| d.id == id).cloned()
    }

    /// Documents whose most recent background save failed.
    pub fn failed_saves(&self) -> HashSet<Uuid> {
        lock(&self.state.failed_saves).clone()
    }

    /// Replace the cached list with the server's view.
    pub async fn refresh(&self) -> Result<usize> {
        let documents = self.store.load_all_documents().await?;
        let count = documents.len();
        *lock(&self.state.documents) = documents;
        lock(&self.state.failed_saves).clear();
        Ok(count)
    }

    /// Re-fetch one document, e.g. after a collaborator saved it.
    pub async fn reload(&self, id: Uuid) -> Result<Document> {
        let fresh = self.store.get_document(id).await?;
        let mut docs = lock(&self.state.documents);
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) => *doc = fresh.clone(),
            None => docs.insert(0, fresh.clone()),
        }
        lock(&self.state.failed_saves).remove(&id);
        Ok(fresh)
    }

    pub fn edit_content(&self, id: Uuid, content: impl Into<String>) -> Result<JoinHandle<()>> {
        let content = content.into();
        self.apply_edit(id, Field::Content, move |doc| doc.content = content)
    }

    pub fn edit_title(&self, id: Uuid, title: impl Into<String>) -> Result<JoinHandle<()>> {
        let title = title.into();
        self.apply_edit(id, Field::Title, move |doc| doc.title = title)
    }

    /// Patch the cached record now and spawn its save. The returned handle
    /// may be dropped; the save runs to completion either way.
    fn apply_edit(&self, id: Uuid, field: Field, patch: impl FnOnce(&mut Document)) -> Result<JoinHandle<()>> {
        self.store.session().require()?;
        {
            let mut docs = lock(&self.state.documents);
            let doc = docs
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| ClientError::Validation(format!("document {} is not loaded", id)))?;
            patch(doc);
        }

        let (store, state) = (self.store.clone(), self.state.clone());
        Ok(tokio::spawn(async move { state.save(&store, id, field).await }))
    }

    /// Create remotely, then add to the front of the list.
    pub async fn create(&self, title: &str) -> Result<Document> {
        let doc = self.store.create_document(title, "").await?;
        lock(&self.state.documents).insert(0, doc.clone());
        Ok(doc)
    }

    /// Delete remotely, then drop from the list.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete_document(id).await?;
        lock(&self.state.documents).retain(|d| d.id != id);
        lock(&self.state.failed_saves).remove(&id);
        Ok(())
    }

    pub fn clear(&self) {
        lock(&self.state.documents).clear();
        lock(&self.state.failed_saves).clear();
    }
}
