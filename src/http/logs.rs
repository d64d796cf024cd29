//! Request identification and request logging.
//!
//! Every request gets an `x-request-id` (UUID v4, kept if the client sent
//! one) which is echoed on the response and attached to the log event.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Paths polled by infrastructure; logged at debug level only.
const QUIET_PATHS: &[&str] = &["/system/health", "/metrics"];

async fn log_request(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    if QUIET_PATHS.contains(&path.as_str()) {
        tracing::debug!(service = "server", request_id = %request_id, method = %method, path = %path, status, latency_ms, "Request completed");
    } else if response.status().is_server_error() {
        tracing::error!(service = "server", request_id = %request_id, method = %method, path = %path, status, latency_ms, "Request failed");
    } else {
        tracing::info!(service = "server", request_id = %request_id, method = %method, path = %path, status, latency_ms, "Request completed");
    }

    response
}

/// Step 2: request ids and per-request log events.
pub struct RequestLogs;

impl Capability for RequestLogs {
    fn step(&self) -> CompositionStep {
        CompositionStep::RequestLogging
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        app.wrap(|router| {
            router.layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(axum::middleware::from_fn(log_request)),
            )
        });
        Ok(())
    }
}
