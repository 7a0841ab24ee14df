use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use quill_types::api::{
    AuthResponse, Claims, LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
    SessionResponse,
};
use quill_types::validate::{is_valid_email, normalize_email};

use crate::email::password_reset_email;
use crate::error::{ApiError, ApiJson};
use crate::{AppState, run_db};

const MIN_PASSWORD_LEN: usize = 8;
const TOKEN_LIFETIME_DAYS: i64 = 30;
const RESET_TOKEN_LIFETIME_MINUTES: i64 = 60;

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("invalid email address"));
    }
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();

    let (uid, mail) = (user_id.to_string(), email.clone());
    if !run_db(&state, move |db| db.create_user(&uid, &mail, &password_hash)).await? {
        return Err(ApiError::Conflict("an account with this email already exists".into()));
    }

    let token = create_token(&state.jwt_secret, user_id, &email)?;
    info!("Registered {} ({})", email, user_id);

    Ok((StatusCode::CREATED, Json(AuthResponse { user_id, email, token })))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    let user = run_db(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;
    let token = create_token(&state.jwt_secret, user_id, &user.email)?;

    Ok(Json(AuthResponse {
        user_id,
        email: user.email,
        token,
    }))
}

/// Current session. Fails if the account behind a still-valid token is gone.
pub async fn session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let uid = claims.sub.to_string();
    run_db(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp as i64, 0).unwrap_or_default();
    Ok(Json(SessionResponse {
        user_id: claims.sub,
        email: claims.email,
        expires_at,
    }))
}

/// Tokens are stateless; signing out is the client discarding its token.
pub async fn logout(Extension(claims): Extension<Claims>) -> StatusCode {
    info!("{} ({}) signed out", claims.email, claims.sub);
    StatusCode::NO_CONTENT
}

/// Answers 202 for any well-formed email, whether or not it has an account.
pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        return Err(ApiError::validation("invalid email address"));
    }
    let mailer = state.mailer()?.clone();

    let lookup = email.clone();
    let Some(user) = run_db(&state, move |db| db.get_user_by_email(&lookup)).await? else {
        info!("Password reset requested for unknown email");
        return Ok(StatusCode::ACCEPTED);
    };

    let token_bytes: [u8; 32] = rand::random();
    let token = URL_SAFE_NO_PAD.encode(token_bytes);
    let token_hash = hash_reset_token(&token);
    let expires_at = (Utc::now() + Duration::minutes(RESET_TOKEN_LIFETIME_MINUTES))
        .to_rfc3339_opts(SecondsFormat::Micros, true);

    let user_id = user.id.clone();
    run_db(&state, move |db| db.insert_password_reset(&token_hash, &user_id, &expires_at)).await?;

    let link = format!("{}/reset-password?token={}", state.public_url.trim_end_matches('/'), token);
    mailer
        .send(password_reset_email(&email, &link))
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    info!("Password reset email sent for user {}", user.id);
    Ok(StatusCode::ACCEPTED)
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, ApiError> {
    validate_password(&req.new_password)?;

    let token_hash = hash_reset_token(&req.token);
    let Some(user_id) = run_db(&state, move |db| db.take_password_reset(&token_hash)).await? else {
        warn!("Rejected invalid or expired password reset token");
        return Err(ApiError::validation("invalid or expired reset token"));
    };

    let password_hash = hash_password(&req.new_password)?;
    let uid = user_id.clone();
    run_db(&state, move |db| db.update_password(&uid, &password_hash)).await?;

    info!("Password reset completed for user {}", user_id);
    Ok(StatusCode::NO_CONTENT)
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Reset tokens are stored as SHA-256 hex digests.
fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (Utc::now() + Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn token_round_trips_through_middleware_decoder() {
        let user_id = Uuid::new_v4();
        let token = create_token("secret", user_id, "a@example.com").unwrap();

        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "a@example.com");

        assert!(matches!(decode_token("other", &token), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn reset_token_hash_is_stable_hex() {
        let h = hash_reset_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_reset_token("abc"));
        assert_ne!(h, hash_reset_token("abd"));
    }
}
