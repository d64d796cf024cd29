//! Usage accounting.
//!
//! Counts requests per (method, matched route, status). Routes are keyed by
//! their template (`/transaction/status/ws/{request_id}`), not the raw path,
//! so the key space stays bounded.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};

/// Route label for requests no route matched.
pub const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UsageKey {
    method: String,
    route: String,
    status: u16,
}

/// One row of the usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    pub method: String,
    pub route: String,
    pub status: u16,
    pub count: u64,
}

/// Concurrent request counters.
#[derive(Debug, Default)]
pub struct UsageTracker {
    counts: DashMap<UsageKey, u64>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, method: &str, route: &str, status: u16) {
        let key = UsageKey {
            method: method.to_string(),
            route: route.to_string(),
            status,
        };
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    /// Snapshot sorted by route, method, status.
    pub fn summary(&self) -> Vec<UsageEntry> {
        let mut entries: Vec<UsageEntry> = self
            .counts
            .iter()
            .map(|entry| UsageEntry {
                method: entry.key().method.clone(),
                route: entry.key().route.clone(),
                status: entry.key().status,
                count: *entry.value(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.route, &a.method, a.status).cmp(&(&b.route, &b.method, b.status))
        });
        entries
    }
}

async fn track_usage(
    State(tracker): State<Arc<UsageTracker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let response = next.run(request).await;
    tracker.record(&method, &route, response.status().as_u16());
    response
}

/// Log the usage summary every `every` until shutdown is signalled.
pub async fn flush_periodically(
    tracker: Arc<UsageTracker>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let total = tracker.total();
                if total > 0 {
                    tracing::info!(service = "server", total, routes = tracker.counts.len(), "Usage summary");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!(service = "server", total = tracker.total(), "Final usage summary");
                return;
            }
        }
    }
}

/// Step 7: usage accounting.
pub struct UsageReporting;

impl Capability for UsageReporting {
    fn step(&self) -> CompositionStep {
        CompositionStep::UsageAccounting
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let tracker = app.state().usage.clone();
        app.wrap(move |router| {
            router.layer(axum::middleware::from_fn_with_state(tracker, track_usage))
        });
        Ok(())
    }
}
