//! API error type and the error-handler capability.
//!
//! All error responses share one JSON shape:
//! `{"error": {"message": "...", "code": "...", "statusCode": 500}}`.

use std::any::Any;
use std::time::Duration;

use axum::{
    extract::Request,
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::observability::metrics;

/// Error returned by handlers and middleware.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    message: &'a str,
    code: &'a str,
    status_code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                message: &self.message,
                code: self.code,
                status_code: self.status.as_u16(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Convert a caught panic into a 500 response.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(service = "server", error = %detail, "Request handler panicked");
    metrics::record_runtime_fault("request_panic");

    ApiError::internal("Internal server error").into_response()
}

/// Give the bare 408 produced by the timeout layer the shared JSON body.
async fn timeout_response(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(header::CONTENT_TYPE)
    {
        tracing::warn!(service = "server", path = %path, "Request timed out");
        return ApiError::new(StatusCode::REQUEST_TIMEOUT, "REQUEST_TIMEOUT", "Request timed out")
            .into_response();
    }
    response
}

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {} not found", uri.path()))
}

/// Step 1: the outermost layer. Panics anywhere below become a JSON 500 and
/// requests running past `request_timeout_secs` become a JSON 408.
pub struct ErrorHandler;

impl Capability for ErrorHandler {
    fn step(&self) -> CompositionStep {
        CompositionStep::ErrorHandler
    }

    #[allow(deprecated)]
    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let limit = Duration::from_secs(app.state().config.listener.request_timeout_secs);
        app.wrap(move |router| {
            router
                .layer(TimeoutLayer::new(limit))
                .layer(axum::middleware::from_fn(timeout_response))
                .layer(CatchPanicLayer::custom(handle_panic))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn error_body_shape() {
        let response = ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT", "slow down")
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMIT");
        assert_eq!(json["error"]["message"], "slow down");
        assert_eq!(json["error"]["statusCode"], 429);
    }

    #[test]
    fn panic_payloads_become_500() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
