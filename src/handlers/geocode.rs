// src/handlers/geocode.rs
use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::AppState;
use axum::{extract::Extension, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_LOCATIONS: usize = 8;

pub fn geocode_routes() -> Router {
    Router::new().route("/api/geocode", post(geocode))
}

#[derive(Debug, Deserialize)]
struct GeocodeRequest {
    locations: Option<Vec<String>>,
}

/// Resolve up to [`MAX_LOCATIONS`] free-text place names. Individual lookup
/// failures are dropped from the result set, never surfaced.
async fn geocode(
    Extension(state): Extension<Arc<AppState>>,
    _user: AuthenticatedUser,
    Json(payload): Json<GeocodeRequest>,
) -> Result<Json<Value>, ApiError> {
    if !state.mapbox_client.is_configured() {
        return Err(ApiError::NotConfigured("Mapbox API key is not configured."));
    }

    let locations = payload.locations.unwrap_or_default();
    if locations.is_empty() {
        return Err(ApiError::Validation("Locations are required.".to_string()));
    }

    let mut results = Vec::new();
    let mut processed = 0usize;
    for location in &locations {
        if processed >= MAX_LOCATIONS {
            break;
        }
        let query = location.trim();
        if query.is_empty() {
            continue;
        }
        if let Some(resolved) = state.mapbox_client.geocode(query).await {
            results.push(resolved);
        }
        processed += 1;
    }

    Ok(Json(json!({ "results": results })))
}
