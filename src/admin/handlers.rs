use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::routes::{queue_overview, QueueOverview};
use crate::http::server::AppState;
use crate::http::usage::UsageEntry;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub mode: &'static str,
    pub sandbox: bool,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub ws_connections: usize,
}

#[derive(Serialize)]
pub struct UsageReport {
    pub total: u64,
    pub entries: Vec<UsageEntry>,
}

#[derive(Serialize)]
pub struct Subscription {
    pub request_id: String,
    pub sockets: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        mode: state.config.mode.as_str(),
        sandbox: state.config.security.sandbox,
        uptime_secs: state.started_at.elapsed().as_secs(),
        total_requests: state.usage.total(),
        ws_connections: state.connections.count(),
    })
}

pub async fn get_usage(State(state): State<AppState>) -> Json<UsageReport> {
    Json(UsageReport {
        total: state.usage.total(),
        entries: state.usage.summary(),
    })
}

pub async fn get_subscriptions(State(state): State<AppState>) -> Json<Vec<Subscription>> {
    Json(
        state
            .connections
            .snapshot()
            .into_iter()
            .map(|(request_id, sockets)| Subscription { request_id, sockets })
            .collect(),
    )
}

pub async fn get_queues(State(state): State<AppState>) -> Json<QueueOverview> {
    Json(queue_overview(&state))
}
