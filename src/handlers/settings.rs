// src/handlers/settings.rs
use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::user::{PasswordUpdateRequest, ProfileUpdateRequest, User};
use crate::repositories::UserRepository;
use crate::utils::normalize_optional;
use crate::AppState;
use axum::{extract::Extension, response::Json, routing::post, Router};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn settings_routes() -> Router {
    Router::new()
        .route("/api/settings/profile", post(update_profile))
        .route("/api/settings/password", post(update_password))
}

async fn update_profile(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let first_name = normalize_optional(payload.first_name.as_deref());
    let last_name = normalize_optional(payload.last_name.as_deref());
    if exceeds_length(first_name.as_deref(), 80) || exceeds_length(last_name.as_deref(), 80) {
        return Err(ApiError::Validation(
            "Name fields must be at most 80 characters.".to_string(),
        ));
    }

    let users = UserRepository::new(state.db_pool.clone());
    require_user(&users, user.0).await?;

    let updated = users
        .update_profile(user.0, first_name.as_deref(), last_name.as_deref())
        .await?;

    Ok(Json(json!({
        "profile": {
            "firstName": updated.first_name,
            "lastName": updated.last_name,
            "email": updated.email,
        }
    })))
}

async fn update_password(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<PasswordUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let current = payload.current_password.as_deref().unwrap_or("").to_string();
    let new_password = payload
        .new_password
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_string();
    if current.is_empty() || new_password.is_empty() {
        return Err(ApiError::Validation(
            "Current and new passwords are required.".to_string(),
        ));
    }

    let users = UserRepository::new(state.db_pool.clone());
    let account = require_user(&users, user.0).await?;

    // Re-verify before accepting a new secret.
    if !verify(&current, &account.password_hash).unwrap_or(false) {
        return Err(ApiError::Validation(
            "Current password is incorrect.".to_string(),
        ));
    }
    if new_password.len() < 8 {
        return Err(ApiError::Validation(
            "New password must be at least 8 characters.".to_string(),
        ));
    }

    let password_hash = hash(&new_password, DEFAULT_COST)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;
    users.update_password(user.0, &password_hash).await?;

    Ok(Json(json!({ "message": "Password updated." })))
}

async fn require_user(users: &UserRepository, user_id: i64) -> Result<User, ApiError> {
    users
        .find_by_id(user_id)
        .await?
        .ok_or(ApiError::AuthRequired)
}

fn exceeds_length(value: Option<&str>, max: usize) -> bool {
    value.map(|v| v.chars().count() > max).unwrap_or(false)
}
