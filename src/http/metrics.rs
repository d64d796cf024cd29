//! Prometheus exposition.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::openapi::RouteDoc;
use crate::http::usage::UNMATCHED_ROUTE;
use crate::observability::metrics;

async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(request).await;
    metrics::record_request(&method, &route, response.status().as_u16(), start);
    response
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Step 8: request metrics and `GET /metrics`.
pub struct MetricsExposition;

impl Capability for MetricsExposition {
    fn step(&self) -> CompositionStep {
        CompositionStep::Metrics
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        if !app.state().config.observability.metrics_enabled {
            tracing::info!(service = "server", "Metrics exposition disabled");
            return Ok(());
        }

        let handle = metrics::install_recorder();
        app.wrap(|router| router.layer(axum::middleware::from_fn(track_metrics)));
        app.routes(
            Router::new().route("/metrics", get(render)).with_state(handle),
            &[RouteDoc::new("get", "/metrics", "Prometheus metrics", "System")],
        );
        Ok(())
    }
}
