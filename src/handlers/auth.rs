// src/handlers/auth.rs
use crate::error::ApiError;
use crate::middleware::auth::{guest_only_middleware, require_auth_middleware, AuthSessionId};
use crate::models::user::{LoginRequest, RegisterRequest};
use crate::repositories::{AuthSessionRepository, UserRepository};
use crate::utils::normalize_optional;
use crate::AppState;
use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn auth_routes() -> Router {
    let guest_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .layer(axum::middleware::from_fn(guest_only_middleware));

    let authenticated_routes = Router::new()
        .route("/logout", post(logout))
        .layer(axum::middleware::from_fn(require_auth_middleware));

    guest_routes.merge(authenticated_routes)
}

type AuthSuccess = (StatusCode, [(header::HeaderName, String); 1], Json<Value>);

async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<AuthSuccess, ApiError> {
    let email = validate_email(&payload.email)?;
    if payload.password.len() < 8 || payload.password.len() > 128 {
        return Err(ApiError::Validation(
            "Password must be between 8 and 128 characters.".to_string(),
        ));
    }
    let first_name = normalize_optional(payload.first_name.as_deref());
    let last_name = normalize_optional(payload.last_name.as_deref());
    if exceeds_length(first_name.as_deref(), 80) || exceeds_length(last_name.as_deref(), 80) {
        return Err(ApiError::Validation(
            "Name fields must be at most 80 characters.".to_string(),
        ));
    }

    let users = UserRepository::new(state.db_pool.clone());
    if users.email_exists(&email).await? {
        return Err(ApiError::Conflict("Email is already registered.".to_string()));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;

    let user = users
        .create(
            &email,
            &password_hash,
            first_name.as_deref(),
            last_name.as_deref(),
        )
        .await?;

    tracing::info!("Registered new user {}", user.id);

    let (token, cookie) = establish_session(&state, user.id).await?;
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "message": "Registration successful.",
            "userId": user.id,
            "sessionToken": token,
        })),
    ))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<AuthSuccess, ApiError> {
    let email = validate_email(&payload.email)?;
    if payload.password.is_empty() {
        return Err(ApiError::Validation("Password is required.".to_string()));
    }

    let users = UserRepository::new(state.db_pool.clone());
    // A missing user and a wrong password must be indistinguishable.
    let user = match users.find_by_email(&email).await? {
        Some(user) if verify(&payload.password, &user.password_hash).unwrap_or(false) => user,
        _ => return Err(ApiError::InvalidCredentials),
    };

    let (token, cookie) = establish_session(&state, user.id).await?;
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "message": "Login successful.",
            "userId": user.id,
            "sessionToken": token,
        })),
    ))
}

async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    session_id: Option<AuthSessionId>,
) -> (StatusCode, [(header::HeaderName, String); 1], Json<Value>) {
    if let Some(AuthSessionId(id)) = session_id {
        let sessions = AuthSessionRepository::new(state.db_pool.clone());
        if let Err(e) = sessions.revoke(&id).await {
            // Best-effort: the cookie is cleared either way.
            tracing::warn!("Failed to revoke session {}: {}", id, e);
        }
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, state.jwt_service.clear_cookie())],
        Json(json!({ "message": "Logged out successfully." })),
    )
}

/// Create a server-side session record and the signed token pointing at it.
async fn establish_session(state: &AppState, user_id: i64) -> Result<(String, String), ApiError> {
    let session_id = Uuid::new_v4().to_string();
    let expires_at =
        chrono::Utc::now() + chrono::Duration::seconds(state.jwt_service.expiration_seconds);

    let sessions = AuthSessionRepository::new(state.db_pool.clone());
    sessions.create(&session_id, user_id, expires_at).await?;

    let token = state
        .jwt_service
        .generate_token(user_id, &session_id)
        .map_err(|e| ApiError::Internal(format!("token generation failed: {}", e)))?;
    let cookie = state.jwt_service.auth_cookie(&token);
    Ok((token, cookie))
}

fn validate_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required.".to_string()));
    }
    if email.len() > 180 {
        return Err(ApiError::Validation("Email is too long.".to_string()));
    }
    // Plausibility only; the mailbox is never verified.
    let well_formed = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !well_formed {
        return Err(ApiError::Validation("Email must be valid.".to_string()));
    }
    Ok(email)
}

fn exceeds_length(value: Option<&str>, max: usize) -> bool {
    value.map(|v| v.chars().count() > max).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalized() {
        assert_eq!(
            validate_email("  Alice@Example.COM ").expect("valid"),
            "alice@example.com"
        );
    }

    #[test]
    fn rejects_implausible_emails() {
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@nodot").is_err());
        let oversized = format!("{}@example.com", "x".repeat(200));
        assert!(validate_email(&oversized).is_err());
    }

    #[test]
    fn name_length_check() {
        assert!(!exceeds_length(None, 80));
        assert!(!exceeds_length(Some("Ada"), 80));
        assert!(exceeds_length(Some(&"x".repeat(81)), 80));
    }
}
