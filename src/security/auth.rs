//! Bearer-token authentication.
//!
//! Tokens come from `ACCESS_TOKENS`. Browsers cannot set headers on a
//! WebSocket handshake, so an `access_token` query parameter is accepted too.
//! `/admin` routes carry their own key check and are skipped here.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::error::ApiError;

const PUBLIC_PATHS: &[&str] = &["/", "/system/health", "/metrics", "/json"];
const PUBLIC_PREFIXES: &[&str] = &["/auth/", "/admin/"];

/// Whether `path` is reachable without a token.
pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
        || path == "/auth"
        || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Extract the presented token from the `authorization` header or the
/// `access_token` query parameter.
pub fn presented_token(request: &Request<Body>) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if from_header.is_some() {
        return from_header;
    }

    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "access_token")
        .map(|(_, value)| value.into_owned())
}

async fn require_token(
    State(tokens): State<Arc<HashSet<String>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    match presented_token(&request) {
        Some(token) if tokens.contains(&token) => next.run(request).await,
        Some(_) => ApiError::unauthorized("Invalid access token").into_response(),
        None => ApiError::unauthorized("Missing access token").into_response(),
    }
}

/// Step 10: bearer authentication.
pub struct Authentication;

impl Capability for Authentication {
    fn step(&self) -> CompositionStep {
        CompositionStep::Authentication
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let security = &app.state().config.security;
        if !security.auth_enabled {
            tracing::warn!(service = "server", "Authentication disabled");
            return Ok(());
        }
        if security.access_tokens.is_empty() {
            return Err(ComposeError::step(
                self.step(),
                "authentication is enabled but ACCESS_TOKENS is empty",
            ));
        }

        let tokens: Arc<HashSet<String>> = Arc::new(security.access_tokens.iter().cloned().collect());
        tracing::info!(service = "server", tokens = tokens.len(), "Bearer authentication enabled");

        app.wrap(move |router| {
            router.layer(axum::middleware::from_fn_with_state(tokens, require_token))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths() {
        assert!(is_public("/"));
        assert!(is_public("/system/health"));
        assert!(is_public("/auth/login"));
        assert!(is_public("/admin/status"));
        assert!(!is_public("/system/queue"));
        assert!(!is_public("/authority"));
    }

    #[test]
    fn token_from_header_or_query() {
        let request = Request::builder()
            .uri("/transaction/status/ws/abc")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(&request).as_deref(), Some("secret"));

        let request = Request::builder()
            .uri("/transaction/status/ws/abc?access_token=other")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_token(&request).as_deref(), Some("other"));

        let request = Request::builder().uri("/x").body(Body::empty()).unwrap();
        assert_eq!(presented_token(&request), None);
    }
}
