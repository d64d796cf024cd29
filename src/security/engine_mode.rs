//! Operating-mode enforcement.
//!
//! In sandbox mode the API is read-only: only safe methods and the `/auth`
//! endpoints go through, everything else is answered with 405.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::error::ApiError;

/// Response header naming the mode that served the request.
pub const X_ENGINE_MODE: &str = "x-engine-mode";

#[derive(Clone, Copy)]
struct ModePolicy {
    sandbox: bool,
    label: &'static str,
}

/// Whether a request may run while the API is read-only.
pub fn allowed_in_sandbox(method: &Method, path: &str) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) || path.starts_with("/auth")
}

async fn enforce_mode(
    State(policy): State<ModePolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = if policy.sandbox
        && !allowed_in_sandbox(request.method(), request.uri().path())
    {
        tracing::debug!(service = "server", method = %request.method(), path = %request.uri().path(), "Write rejected in sandbox mode");
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "SANDBOX_MODE",
            "Write operations are disabled in sandbox mode",
        )
        .into_response()
    } else {
        next.run(request).await
    };

    response
        .headers_mut()
        .insert(X_ENGINE_MODE, HeaderValue::from_static(policy.label));
    response
}

/// Step 6: sandbox enforcement and the `x-engine-mode` header.
pub struct ModeEnforcement;

impl Capability for ModeEnforcement {
    fn step(&self) -> CompositionStep {
        CompositionStep::ModeEnforcement
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let config = app.state().config.clone();
        let policy = ModePolicy {
            sandbox: config.security.sandbox,
            label: if config.security.sandbox {
                "sandbox"
            } else {
                config.mode.as_str()
            },
        };
        if policy.sandbox {
            tracing::warn!(service = "server", "Sandbox mode: write requests will be rejected");
        }

        app.wrap(move |router| {
            router.layer(axum::middleware::from_fn_with_state(policy, enforce_mode))
        });
        Ok(())
    }
}
