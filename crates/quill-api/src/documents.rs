use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use quill_db::models::{DocumentAccess, DocumentRow, UpdateOutcome};
use quill_types::api::{Claims, CreateDocumentRequest, UpdateDocumentRequest};
use quill_types::events::{DOCUMENT_SAVED_EVENT, document_topic};
use quill_types::models::Document;
use quill_types::validate::normalize_email;

use crate::error::{ApiError, ApiJson};
use crate::{AppState, run_db};

const DEFAULT_TITLE: &str = "Untitled document";
const MAX_TITLE_LEN: usize = 200;

/// Resolve the caller's access to a document. Missing documents and
/// documents the caller cannot see are both reported as 404.
pub(crate) async fn require_access(
    state: &AppState,
    document_id: Uuid,
    claims: &Claims,
) -> Result<DocumentAccess, ApiError> {
    let (did, uid, email) = (document_id.to_string(), claims.sub.to_string(), normalize_email(&claims.email));
    run_db(state, move |db| db.document_access(&did, &uid, &email))
        .await?
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn require_owner(state: &AppState, document_id: Uuid, claims: &Claims) -> Result<(), ApiError> {
    if require_access(state, document_id, claims).await?.is_owner() {
        Ok(())
    } else {
        Err(ApiError::forbidden("only the document owner can do this"))
    }
}

pub(crate) async fn load_document(state: &AppState, document_id: Uuid) -> Result<Document, ApiError> {
    let did = document_id.to_string();
    let row = run_db(state, move |db| db.get_document(&did)).await?.ok_or(ApiError::NotFound)?;
    Ok(row.into_document()?)
}

fn into_documents(rows: Vec<DocumentRow>) -> Result<Vec<Document>, ApiError> {
    rows.into_iter()
        .map(|row| row.into_document().map_err(ApiError::from))
        .collect()
}

/// GET /documents: documents owned by the caller.
pub async fn list_owned(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    let rows = run_db(&state, move |db| db.list_owned_documents(&uid)).await?;
    Ok(Json(into_documents(rows)?))
}

/// GET /documents/shared: documents with a permission row for the caller's email.
pub async fn list_shared(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&claims.email);
    let rows = run_db(&state, move |db| db.list_shared_documents(&email)).await?;
    Ok(Json(into_documents(rows)?))
}

pub async fn create_document(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = normalize_title(&req.title)?;
    let document_id = Uuid::new_v4();

    let (did, uid) = (document_id.to_string(), claims.sub.to_string());
    let row = run_db(&state, move |db| db.create_document(&did, &uid, &title, &req.content)).await?;

    info!("{} created document {}", claims.email, document_id);
    Ok((StatusCode::CREATED, Json(row.into_document()?)))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_access(&state, document_id, &claims).await?;
    Ok(Json(load_document(&state, document_id).await?))
}

/// PATCH /documents/{id}. Owners and editors may change title/content;
/// only owners may flip the public flag. With `expected_version` set the
/// save is rejected with 409 when someone else saved first.
pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<UpdateDocumentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.is_empty() {
        return Err(ApiError::validation("nothing to update"));
    }
    let title = req.title.as_deref().map(normalize_title).transpose()?;

    let access = require_access(&state, document_id, &claims).await?;
    if req.is_public.is_some() && !access.is_owner() {
        return Err(ApiError::forbidden("only the document owner can change visibility"));
    }
    if (title.is_some() || req.content.is_some()) && !access.can_edit() {
        return Err(ApiError::forbidden("editor role required"));
    }

    let did = document_id.to_string();
    let outcome = run_db(&state, move |db| {
        db.update_document(&did, title.as_deref(), req.content.as_deref(), req.is_public, req.expected_version)
    })
    .await?;

    let document = match outcome {
        UpdateOutcome::Updated(row) => row.into_document()?,
        UpdateOutcome::VersionMismatch { current } => {
            warn!(
                "{} lost a save race on {} (expected {:?}, current {})",
                claims.email, document_id, req.expected_version, current
            );
            return Err(ApiError::Conflict(format!(
                "document was changed by someone else (current version {})",
                current
            )));
        }
        UpdateOutcome::NotFound => return Err(ApiError::NotFound),
    };

    state
        .dispatcher
        .publish(
            &document_topic(document_id),
            DOCUMENT_SAVED_EVENT,
            serde_json::json!({
                "document_id": document_id,
                "version": document.version,
                "updated_at": document.updated_at,
                "saved_by": claims.sub,
            }),
        )
        .await;

    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_owner(&state, document_id, &claims).await?;

    let (did, uid) = (document_id.to_string(), claims.sub.to_string());
    if !run_db(&state, move |db| db.delete_document(&did, &uid)).await? {
        return Err(ApiError::NotFound);
    }

    info!("{} deleted document {}", claims.email, document_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /public/documents/{id}: no session; only rows flagged public.
pub async fn get_public_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let did = document_id.to_string();
    let row = run_db(&state, move |db| db.get_public_document(&did))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(row.into_document()?))
}

fn normalize_title(raw: &str) -> Result<String, ApiError> {
    let title = raw.trim();
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::validation(format!("title longer than {} characters", MAX_TITLE_LEN)));
    }
    Ok(if title.is_empty() { DEFAULT_TITLE.to_string() } else { title.to_string() })
}
