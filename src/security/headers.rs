//! Security response headers.
//!
//! Headers are only added when the handler did not set them already.
//! `strict-transport-security` is sent only when the server speaks HTTPS.

use axum::http::{header, HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};

const HSTS: &str = "max-age=15552000; includeSubDomains";

/// Headers added to every response.
pub fn security_headers(https: bool) -> Vec<(HeaderName, HeaderValue)> {
    let mut headers = vec![
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
        (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'"),
        ),
    ];
    if https {
        headers.push((header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS)));
    }
    headers
}

/// Step 3: hardening headers.
pub struct SecurityHeaders;

impl Capability for SecurityHeaders {
    fn step(&self) -> CompositionStep {
        CompositionStep::SecurityHeaders
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let config = app.state().config.clone();
        if !config.security.enable_headers {
            tracing::info!(service = "server", "Security headers disabled");
            return Ok(());
        }

        let headers = security_headers(config.listener.https.enabled);

        app.wrap(move |mut router| {
            for (name, value) in headers {
                router = router.layer(SetResponseHeaderLayer::if_not_present(name, value));
            }
            router
        });
        Ok(())
    }
}
