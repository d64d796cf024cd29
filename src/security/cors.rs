//! Cross-origin resource sharing policy.

use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use url::Url;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};

/// Build the CORS layer for the configured origins. `*` anywhere in the list
/// allows every origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, String> {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(base.allow_origin(Any));
    }

    let mut allowed = Vec::with_capacity(origins.len());
    for origin in origins {
        let parsed = Url::parse(origin).map_err(|e| format!("invalid origin {origin:?}: {e}"))?;
        if parsed.host_str().is_none() {
            return Err(format!("invalid origin {origin:?}: missing host"));
        }
        let value = HeaderValue::from_str(origin.trim_end_matches('/'))
            .map_err(|e| format!("invalid origin {origin:?}: {e}"))?;
        allowed.push(value);
    }

    Ok(base.allow_origin(AllowOrigin::list(allowed)))
}

/// Step 4: CORS.
pub struct Cors;

impl Capability for Cors {
    fn step(&self) -> CompositionStep {
        CompositionStep::Cors
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let origins = &app.state().config.security.cors_origins;
        let layer = cors_layer(origins).map_err(|reason| ComposeError::step(self.step(), reason))?;
        tracing::info!(service = "server", origins = ?origins, "CORS policy configured");

        app.wrap(move |router| router.layer(layer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_explicit_origins() {
        assert!(cors_layer(&["*".to_string()]).is_ok());
        assert!(cors_layer(&["https://dashboard.example.com".to_string()]).is_ok());
    }

    #[test]
    fn unparsable_origin_rejected() {
        let err = cors_layer(&["not a url".to_string()]).unwrap_err();
        assert!(err.contains("not a url"));
    }
}
