//! Service routes: banner, health and queue status.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::openapi::RouteDoc;
use crate::http::server::AppState;
use crate::lifecycle::shutdown::CoordinatorState;
use crate::worker::{QueueName, QueueState};

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub mode: &'static str,
    pub version: &'static str,
    #[serde(rename = "uptimeSecs")]
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct QueueStatus {
    pub name: QueueName,
    pub state: QueueState,
}

#[derive(Serialize)]
pub struct QueueOverview {
    pub workers: bool,
    pub coordinator: CoordinatorState,
    pub queues: Vec<QueueStatus>,
}

async fn banner() -> &'static str {
    "Engine is running"
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let status = match state.coordinator.state() {
        CoordinatorState::Running => "ok",
        CoordinatorState::Draining | CoordinatorState::Closed => "shutting_down",
    };
    Json(Health {
        status,
        mode: state.config.mode.as_str(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Queue states as seen by the shutdown coordinator.
pub fn queue_overview(state: &AppState) -> QueueOverview {
    QueueOverview {
        workers: state.config.mode.runs_workers(),
        coordinator: state.coordinator.state(),
        queues: state
            .coordinator
            .handles()
            .iter()
            .map(|h| QueueStatus {
                name: h.name(),
                state: h.state(),
            })
            .collect(),
    }
}

async fn queues(State(state): State<AppState>) -> Json<QueueOverview> {
    Json(queue_overview(&state))
}

/// Step 12: business routes.
pub struct BusinessRoutes;

impl Capability for BusinessRoutes {
    fn step(&self) -> CompositionStep {
        CompositionStep::Routes
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let router = Router::new()
            .route("/", get(banner))
            .route("/system/health", get(health))
            .route("/system/queue", get(queues))
            .with_state(app.state().clone());
        app.routes(
            router,
            &[
                RouteDoc::new("get", "/", "Service banner", "System"),
                RouteDoc::new("get", "/system/health", "Health check", "System"),
                RouteDoc::new("get", "/system/queue", "Queue lifecycle states", "System"),
            ],
        );
        Ok(())
    }
}
