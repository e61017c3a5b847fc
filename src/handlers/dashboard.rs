// src/handlers/dashboard.rs
use crate::error::ApiError;
use crate::middleware::auth::{require_auth_middleware, AuthenticatedUser};
use crate::repositories::{ChatMessageRepository, ChatRepository};
use crate::AppState;
use axum::{extract::Extension, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn dashboard_routes() -> Router {
    Router::new()
        .route("/api/dashboard", get(dashboard_data))
        .layer(axum::middleware::from_fn(require_auth_middleware))
}

/// Aggregated view for the dashboard page: all chats newest-first, plus the
/// most recent chat's conversation.
async fn dashboard_data(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let chats = ChatRepository::new(state.db_pool.clone())
        .find_by_user_desc(user.0)
        .await?;

    let previous_recommendations: Vec<Value> = chats
        .iter()
        .map(|chat| {
            let title = chat
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("Untitled chat");
            json!({
                "id": chat.id,
                "title": title,
                "subtitle": "AI travel recommendations",
            })
        })
        .collect();

    let chat_messages: Vec<Value> = match chats.first() {
        None => Vec::new(),
        Some(latest) => ChatMessageRepository::new(state.db_pool.clone())
            .find_by_chat_asc(latest.id)
            .await?
            .iter()
            .map(|m| m.to_dto())
            .collect(),
    };

    Ok(Json(json!({
        "previousRecommendations": previous_recommendations,
        "chatMessages": chat_messages,
    })))
}
