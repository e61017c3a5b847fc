// src/middleware/auth.rs
use crate::error::ApiError;
use crate::repositories::AuthSessionRepository;
use crate::AppState;
use axum::{
    extract::{Extension, FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde_json::json;
use std::sync::Arc;

/// Identity of the caller, resolved once per request by
/// [`identity_middleware`] and read by handlers through the extractor impl.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub i64);

/// The session record id (JWT `jti`) backing the current credential.
/// Present only alongside [`AuthenticatedUser`]; logout revokes it.
#[derive(Debug, Clone)]
pub struct AuthSessionId(pub String);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or(ApiError::AuthRequired)
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthSessionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthSessionId>()
            .cloned()
            .ok_or(ApiError::AuthRequired)
    }
}

/// Resolve the caller identity on every request: bearer token first, auth
/// cookie second; the token must validate and its `jti` must name a live
/// session record owned by the claimed user. Failures leave the request
/// anonymous — route guards and extractors decide what that means.
pub async fn identity_middleware(
    Extension(state): Extension<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_token(request.headers(), &state.jwt_service.cookie_name) {
        if let Some(claims) = state.jwt_service.validate(&token) {
            let sessions = AuthSessionRepository::new(state.db_pool.clone());
            match sessions.find_by_id(&claims.jti).await {
                Ok(Some(session))
                    if session.user_id == claims.uid
                        && session.is_active(chrono::Utc::now()) =>
                {
                    request.extensions_mut().insert(AuthenticatedUser(claims.uid));
                    request.extensions_mut().insert(AuthSessionId(claims.jti));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Session lookup failed: {}", e);
                }
            }
        }
    }

    next.run(request).await
}

/// Gate for routes that need a signed-in caller: JSON clients get a 401,
/// browsers a redirect to the login page.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthenticatedUser>().is_some() {
        return next.run(request).await;
    }
    if is_json_request(request.headers()) {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Authentication required." })),
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

/// Gate for login/register: an already-authenticated caller is bounced to
/// the dashboard (409 for JSON clients).
pub async fn guest_only_middleware(request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthenticatedUser>().is_none() {
        return next.run(request).await;
    }
    if is_json_request(request.headers()) {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Already authenticated." })),
        )
            .into_response()
    } else {
        Redirect::to("/dashboard").into_response()
    }
}

fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    cookie_value(headers, cookie_name)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(name) {
                if let Some(value) = parts.next() {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

fn is_json_request(headers: &HeaderMap) -> bool {
    let contains_json = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false)
    };
    contains_json(header::ACCEPT) || contains_json(header::CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("AUTH_TOKEN=cookie-token"),
        );
        assert_eq!(
            extract_token(&headers, "AUTH_TOKEN"),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn falls_back_to_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; AUTH_TOKEN=cookie-token; other=1"),
        );
        assert_eq!(
            extract_token(&headers, "AUTH_TOKEN"),
            Some("cookie-token".to_string())
        );
    }

    #[test]
    fn missing_credential_is_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, "AUTH_TOKEN"), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("AUTH_TOKEN="));
        assert_eq!(extract_token(&headers, "AUTH_TOKEN"), None);
    }

    #[test]
    fn json_detection_checks_accept_and_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        assert!(!is_json_request(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert!(is_json_request(&headers));
    }
}
