use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::error::ApiError;

/// Require `Authorization: Bearer <ADMIN_API_KEY>`. With no key configured
/// every request is rejected.
pub async fn admin_auth_middleware(
    State(key): State<Option<Arc<str>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = key else {
        return ApiError::unauthorized("Admin API is not configured").into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == &*key => next.run(request).await,
        _ => ApiError::unauthorized("Invalid admin key").into_response(),
    }
}
