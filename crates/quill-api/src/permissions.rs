use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use quill_types::api::{Claims, ShareRequest};
use quill_types::models::{Permission, Role};
use quill_types::validate::{is_valid_email, normalize_email};

use crate::documents::require_owner;
use crate::error::{ApiError, ApiJson};
use crate::{AppState, run_db};

/// Parse and check a share target. Runs before any access check or
/// provider call.
pub(crate) fn validate_share(email: &str, role: &str) -> Result<(String, Role), ApiError> {
    let role: Role = role.parse().map_err(|e: quill_types::models::InvalidRole| ApiError::validation(e.to_string()))?;
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("invalid email address"));
    }
    Ok((email, role))
}

/// Owner-only upsert of a permission row. Returns the row and whether it
/// was newly created.
pub(crate) async fn grant(
    state: &AppState,
    claims: &Claims,
    document_id: Uuid,
    email: String,
    role: Role,
) -> Result<(Permission, bool), ApiError> {
    require_owner(state, document_id, claims).await?;

    if email == normalize_email(&claims.email) {
        return Err(ApiError::validation("the owner already has full access"));
    }

    let (pid, did) = (Uuid::new_v4().to_string(), document_id.to_string());
    let (row, created) = run_db(state, move |db| db.upsert_permission(&pid, &did, &email, role)).await?;
    let permission = row.into_permission()?;

    info!(
        "{} {} {} as {} on {}",
        claims.email,
        if created { "shared with" } else { "changed role of" },
        permission.grantee_email,
        permission.role,
        document_id
    );
    Ok((permission, created))
}

/// PUT /documents/{id}/permissions: share upsert keyed on (document, email).
pub async fn share_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<ShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (email, role) = validate_share(&req.email, &req.role)?;
    let (permission, created) = grant(&state, &claims, document_id, email, role).await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(permission)))
}

pub async fn list_permissions(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_owner(&state, document_id, &claims).await?;

    let did = document_id.to_string();
    let rows = run_db(&state, move |db| db.list_permissions(&did)).await?;
    let permissions = rows
        .into_iter()
        .map(|row| row.into_permission())
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(permissions))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    Path((document_id, email)): Path<(Uuid, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_owner(&state, document_id, &claims).await?;

    let (did, grantee) = (document_id.to_string(), normalize_email(&email));
    let log_grantee = grantee.clone();
    if !run_db(&state, move |db| db.delete_permission(&did, &grantee)).await? {
        return Err(ApiError::NotFound);
    }

    info!("{} revoked {} on {}", claims.email, log_grantee, document_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_validation() {
        assert!(matches!(validate_share("bob@example.com", "owner"), Err(ApiError::Validation(_))));
        assert!(matches!(validate_share("bob@example.com", "EDITOR"), Err(ApiError::Validation(_))));
        assert!(matches!(validate_share("not-an-email", "viewer"), Err(ApiError::Validation(_))));

        let (email, role) = validate_share(" Bob@Example.com ", "commenter").unwrap();
        assert_eq!(email, "bob@example.com");
        assert_eq!(role, Role::Commenter);
    }
}
