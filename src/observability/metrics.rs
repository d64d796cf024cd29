//! Metrics collection and exposition.
//!
//! # Metrics
//! - `engine_http_requests_total` (counter): requests by method, route, status
//! - `engine_http_request_duration_seconds` (histogram): latency distribution
//! - `engine_rate_limited_total` (counter): requests rejected by the limiter
//! - `engine_jobs_total` (counter): finished jobs by queue and outcome
//! - `engine_queue_close_total` (counter): shutdown closes by queue and result
//! - `engine_runtime_faults_total` (counter): panics and task errors survived
//! - `engine_ws_connections` (gauge): open subscription sockets
//!
//! # Design Decisions
//! - One process-wide Prometheus recorder, installed lazily on first use
//! - The text exposition is served by the HTTP server itself (`/metrics`)

use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (once) and return its handle.
pub fn install_recorder() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!(service = "server", "A metrics recorder was already installed");
            }
            handle
        })
        .clone()
}

/// Record a completed HTTP request.
pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!(
        "engine_http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "engine_http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("engine_rate_limited_total").increment(1);
}

pub fn record_job(queue: &'static str, outcome: &'static str) {
    counter!("engine_jobs_total", "queue" => queue, "outcome" => outcome).increment(1);
}

pub fn record_queue_close(queue: &'static str, clean: bool) {
    let result = if clean { "ok" } else { "error" };
    counter!("engine_queue_close_total", "queue" => queue, "result" => result).increment(1);
}

pub fn record_runtime_fault(kind: &'static str) {
    counter!("engine_runtime_faults_total", "kind" => kind).increment(1);
}

pub fn set_ws_connections(count: usize) {
    gauge!("engine_ws_connections").set(count as f64);
}
