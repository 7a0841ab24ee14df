use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quill_types::api::{Claims, CreateCommentRequest};

use crate::documents::require_access;
use crate::error::{ApiError, ApiJson};
use crate::{AppState, run_db};

const MAX_COMMENT_LEN: usize = 5000;

pub async fn list_comments(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_access(&state, document_id, &claims).await?;

    let did = document_id.to_string();
    let rows = run_db(&state, move |db| db.list_comments(&did)).await?;
    let comments = rows
        .into_iter()
        .map(|row| row.into_comment())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("comment is empty"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(ApiError::validation(format!("comment longer than {} characters", MAX_COMMENT_LEN)));
    }
    if let Some(selection) = req.selection {
        if selection.from > selection.to {
            return Err(ApiError::validation("selection start is after its end"));
        }
    }

    if !require_access(&state, document_id, &claims).await?.can_comment() {
        return Err(ApiError::forbidden("commenter role required"));
    }

    let comment_id = Uuid::new_v4();
    let (cid, did, uid, email) = (
        comment_id.to_string(),
        document_id.to_string(),
        claims.sub.to_string(),
        claims.email.clone(),
    );
    let row = run_db(&state, move |db| {
        db.insert_comment(&cid, &did, &uid, &email, &content, req.selection)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(row.into_comment()?)))
}

/// DELETE /comments/{id}: allowed for the comment's author and the
/// document's owner.
pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let cid = comment_id.to_string();
    let comment = run_db(&state, move |db| db.get_comment(&cid))
        .await?
        .ok_or(ApiError::NotFound)?
        .into_comment()?;

    if comment.author_id != claims.sub {
        let access = require_access(&state, comment.document_id, &claims).await?;
        if !access.is_owner() {
            return Err(ApiError::forbidden("only the author or the document owner can delete a comment"));
        }
    }

    let cid = comment_id.to_string();
    if !run_db(&state, move |db| db.delete_comment(&cid)).await? {
        return Err(ApiError::NotFound);
    }

    info!("{} deleted comment {} on {}", claims.email, comment_id, comment.document_id);
    Ok(StatusCode::NO_CONTENT)
}
