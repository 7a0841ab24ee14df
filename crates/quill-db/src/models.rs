/// Database row types. Ids and timestamps stay as the TEXT stored in SQLite;
/// `into_*` converts to the typed models shared with the API.
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use quill_types::models::{Comment, Document, Permission, Role, SelectionRange};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub is_public: bool,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct PermissionRow {
    pub id: String,
    pub document_id: String,
    pub grantee_email: String,
    pub role: String,
    pub created_at: String,
}

pub struct CommentRow {
    pub id: String,
    pub document_id: String,
    pub author_id: String,
    pub author_email: String,
    pub content: String,
    pub selection_from: Option<u32>,
    pub selection_to: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
}

/// How a user may reach a document. `None` from the access query means no
/// access at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentAccess {
    Owner,
    Shared(Role),
    /// Not owner, not a grantee, but the document is flagged public.
    Public,
}

impl DocumentAccess {
    pub fn is_owner(self) -> bool {
        matches!(self, Self::Owner)
    }

    pub fn can_edit(self) -> bool {
        match self {
            Self::Owner => true,
            Self::Shared(role) => role.can_edit(),
            Self::Public => false,
        }
    }

    pub fn can_comment(self) -> bool {
        match self {
            Self::Owner => true,
            Self::Shared(role) => role.can_comment(),
            Self::Public => false,
        }
    }
}

/// Outcome of a conditional document save.
#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(DocumentRow),
    VersionMismatch { current: i64 },
    NotFound,
}

/// Timestamps are written as fixed-width RFC 3339 so TEXT ordering matches
/// chronological ordering.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt {} '{}'", what, raw))
}

impl DocumentRow {
    pub fn into_document(self) -> Result<Document> {
        Ok(Document {
            id: parse_id(&self.id, "document id")?,
            owner_id: parse_id(&self.owner_id, "owner id")?,
            title: self.title,
            content: self.content,
            is_public: self.is_public,
            version: self.version,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl PermissionRow {
    pub fn into_permission(self) -> Result<Permission> {
        Ok(Permission {
            id: parse_id(&self.id, "permission id")?,
            document_id: parse_id(&self.document_id, "document id")?,
            role: self.role.parse()?,
            grantee_email: self.grantee_email,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl CommentRow {
    pub fn into_comment(self) -> Result<Comment> {
        let selection = match (self.selection_from, self.selection_to) {
            (Some(from), Some(to)) => Some(SelectionRange { from, to }),
            _ => None,
        };
        Ok(Comment {
            id: parse_id(&self.id, "comment id")?,
            document_id: parse_id(&self.document_id, "document id")?,
            author_id: parse_id(&self.author_id, "author id")?,
            author_email: self.author_email,
            content: self.content,
            selection,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}
