//! Operator authentication for the event audit and replay routes

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

/// Extract bearer token from the Authorization header
fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
}

/// Middleware that requires `Authorization: Bearer <STRIPE_ADMIN_TOKEN>`
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(expected) = state.config.admin_token.as_deref() else {
        tracing::warn!(path = %path, "require_admin_token: no admin token configured");
        return ApiError::Unauthorized.into_response();
    };

    let authorized = extract_bearer_token(&request)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    if !authorized {
        tracing::warn!(path = %path, "require_admin_token: missing or invalid token");
        return ApiError::Unauthorized.into_response();
    }

    next.run(request).await
}
