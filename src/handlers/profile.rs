// src/handlers/profile.rs
use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::trip_profile::{profile_dto, TripProfile, TripProfileRequest};
use crate::repositories::{ChatRepository, TripProfileRepository};
use crate::utils::normalize_optional;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn profile_routes() -> Router {
    Router::new()
        .route("/api/chat/:id/profile", get(get_profile))
        .route("/api/chat/:id/profile", post(save_profile))
}

async fn get_profile(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(chat_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    require_owned_chat(&state, chat_id, user.0).await?;

    let profile = TripProfileRepository::new(state.db_pool.clone())
        .find_by_chat(chat_id)
        .await?;
    Ok(Json(json!({ "profile": profile_dto(profile.as_ref()) })))
}

async fn save_profile(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(chat_id): Path<i64>,
    Json(payload): Json<TripProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    require_owned_chat(&state, chat_id, user.0).await?;

    let profile = TripProfile {
        id: 0, // assigned by the database
        chat_id,
        destination: normalize_optional(payload.destination.as_deref()),
        start_date: normalize_optional(payload.start_date.as_deref()),
        end_date: normalize_optional(payload.end_date.as_deref()),
        budget: normalize_optional(payload.budget.as_deref()),
        travelers: normalize_optional(payload.travelers.as_deref()),
        interests: normalize_optional(payload.interests.as_deref()),
        constraints: normalize_optional(payload.constraints.as_deref()),
    };

    let saved = TripProfileRepository::new(state.db_pool.clone())
        .upsert(&profile)
        .await?;
    Ok(Json(json!({ "profile": profile_dto(Some(&saved)) })))
}

async fn require_owned_chat(state: &AppState, chat_id: i64, user_id: i64) -> Result<(), ApiError> {
    ChatRepository::new(state.db_pool.clone())
        .find_by_id_and_user(chat_id, user_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::NotFound("Chat not found.".to_string()))
}
