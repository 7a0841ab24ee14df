use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::{error, info};

use quill_types::api::{Claims, InviteRequest, InviteResponse};

use crate::documents::load_document;
use crate::email::invitation_email;
use crate::error::{ApiError, ApiJson};
use crate::permissions::{grant, validate_share};
use crate::AppState;

/// POST /invites: grant a role and email the grantee a link.
///
/// Input is validated before anything else so a malformed request never
/// reaches the email provider. The permission row is written before the
/// email goes out; a provider failure leaves the grant in place and
/// reports 502.
pub async fn send_invite(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (email, role) = validate_share(&req.email, &req.role)?;
    let mailer = state.mailer()?.clone();

    let (permission, _) = grant(&state, &claims, req.document_id, email, role).await?;
    let document = load_document(&state, req.document_id).await?;

    let message = invitation_email(
        &permission.grantee_email,
        permission.role,
        &document.title,
        &state.document_link(document.id),
        &claims.email,
    );
    let message_id = mailer.send(message).await.map_err(|e| {
        error!("Invitation to {} for {} failed: {}", permission.grantee_email, document.id, e);
        ApiError::Upstream(e.to_string())
    })?;

    info!(
        "{} invited {} to {} as {} (message {})",
        claims.email, permission.grantee_email, document.id, permission.role, message_id
    );
    Ok(Json(InviteResponse { message_id }))
}
