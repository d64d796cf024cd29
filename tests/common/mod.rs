//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use tower::ServiceExt;

use engine_host::config::EngineConfig;
use engine_host::http::{AppState, ConnectionManager};
use engine_host::lifecycle::mode::OperatingMode;
use engine_host::lifecycle::startup::{EngineContext, Launcher, StartupError};
use engine_host::lifecycle::ShutdownCoordinator;
use engine_host::worker::{QueueConsumer, QueueError, QueueHandle, QueueName};

pub const TOKEN: &str = "test-token";
pub const ADMIN_KEY: &str = "admin-secret";

/// Config for tests: ephemeral port, one known token, no periodic flush.
pub fn test_config(mode: OperatingMode) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.mode = mode;
    config.listener.port = 0;
    config.security.access_tokens = vec![TOKEN.to_string()];
    config.security.admin_api_key = Some(ADMIN_KEY.to_string());
    config.observability.usage_flush_secs = 0;
    config.shutdown.queue_close_timeout_ms = 500;
    config.shutdown.http_drain_ms = 500;
    config
}

pub fn app_state(config: EngineConfig) -> AppState {
    AppState::new(
        Arc::new(config),
        Arc::new(ShutdownCoordinator::new(Duration::from_millis(500))),
        Arc::new(ConnectionManager::new()),
    )
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

pub fn get_with_token(path: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Consumer that records the order closes happen in.
pub struct RecordingConsumer {
    name: QueueName,
    closes: Arc<Mutex<Vec<QueueName>>>,
    close_delay: Option<Duration>,
}

impl RecordingConsumer {
    pub fn new(name: QueueName, closes: Arc<Mutex<Vec<QueueName>>>) -> Self {
        Self {
            name,
            closes,
            close_delay: None,
        }
    }

    /// Make every close take `delay` before it is recorded.
    pub fn with_close_delay(mut self, delay: Option<Duration>) -> Self {
        self.close_delay = delay;
        self
    }
}

#[async_trait]
impl QueueConsumer for RecordingConsumer {
    fn name(&self) -> QueueName {
        self.name
    }

    async fn start(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.closes.lock().unwrap().push(self.name);
        Ok(())
    }
}

/// Launcher that records which subsystems were invoked. Workers are
/// recording consumers; the first `fail_after` queues start and the next
/// one fails, when set.
#[derive(Default)]
pub struct FakeLauncher {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub closes: Arc<Mutex<Vec<QueueName>>>,
    pub fail_workers_after: Option<usize>,
    pub close_delay: Option<Duration>,
}

impl FakeLauncher {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    type Server = ();

    async fn start_server(&self, _ctx: &EngineContext) -> Result<(), StartupError> {
        self.calls.lock().unwrap().push("server");
        Ok(())
    }

    async fn start_workers(&self, ctx: &EngineContext) -> Result<Vec<QueueHandle>, StartupError> {
        self.calls.lock().unwrap().push("workers");
        let mut handles = Vec::new();
        for (i, name) in QueueName::ALL.into_iter().enumerate() {
            if self.fail_workers_after == Some(i) {
                return Err(StartupError::Worker(QueueError::Start {
                    queue: name,
                    reason: "injected".to_string(),
                }));
            }
            let consumer = RecordingConsumer::new(name, self.closes.clone()).with_close_delay(self.close_delay);
            let handle = QueueHandle::running(Arc::new(consumer));
            ctx.coordinator.register(handle.clone());
            handles.push(handle);
        }
        Ok(handles)
    }

    async fn stop_server(&self, _server: (), _drain: Duration) {
        self.calls.lock().unwrap().push("stop_server");
    }
}
