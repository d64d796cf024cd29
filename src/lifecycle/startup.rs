//! Startup orchestration.
//!
//! # Responsibilities
//! - Decide from the operating mode which subsystems start
//! - Start the HTTP server and the queue workers (concurrently in `combined`)
//! - Turn any initialization failure into a [`StartupError`]
//! - Hand over to the shutdown coordinator on termination
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, nothing is retried
//! - A subsystem the mode does not select is never touched
//! - Queues registered before a failure are still drained on the way out

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::http::compose::ComposeError;
use crate::http::server::{AppState, HttpServer, RunningServer, ServerError};
use crate::http::websocket::ConnectionManager;
use crate::lifecycle::mode::OperatingMode;
use crate::lifecycle::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::net::listener::ListenerError;
use crate::net::tls::TlsError;
use crate::worker::{QueueError, QueueFactory, QueueHandle, WorkerBootstrapper};

/// Fatal initialization failure. The process exits with [`Self::exit_code`].
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("TLS setup failed: {0}")]
    Tls(TlsError),

    #[error("server composition failed: {0}")]
    Compose(ComposeError),

    #[error("listener bind failed: {0}")]
    Bind(ListenerError),

    #[error("server I/O error: {0}")]
    Io(std::io::Error),

    #[error("worker startup failed: {0}")]
    Worker(#[from] QueueError),
}

impl From<ServerError> for StartupError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Tls(e) => StartupError::Tls(e),
            ServerError::Compose(e) => StartupError::Compose(e),
            ServerError::Bind(e) => StartupError::Bind(e),
            ServerError::Io(e) => StartupError::Io(e),
        }
    }
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Subsystem the failure originated in, for the `service` log field.
    pub fn subsystem(&self) -> &'static str {
        match self {
            StartupError::Config(_) => "config",
            StartupError::Worker(_) => "worker",
            _ => "server",
        }
    }
}

/// What every subsystem starter gets.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub coordinator: Arc<ShutdownCoordinator>,
}

/// Starts and stops the subsystems. The seam tests replace.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Server: Send;

    async fn start_server(&self, ctx: &EngineContext) -> Result<Self::Server, StartupError>;

    /// Start every queue and register it with `ctx.coordinator`.
    async fn start_workers(&self, ctx: &EngineContext) -> Result<Vec<QueueHandle>, StartupError>;

    /// Let in-flight requests finish within `drain`, then stop.
    async fn stop_server(&self, server: Self::Server, drain: Duration);
}

/// Subsystems that came up.
pub struct Started<S> {
    pub server: Option<S>,
    pub queues: Vec<QueueHandle>,
}

/// Drives startup, steady state and shutdown for one process.
pub struct Orchestrator<L: Launcher> {
    launcher: L,
    ctx: EngineContext,
}

impl<L: Launcher> Orchestrator<L> {
    pub fn new(config: EngineConfig, launcher: L) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_millis(
            config.shutdown.queue_close_timeout_ms,
        )));
        Self {
            launcher,
            ctx: EngineContext {
                config: Arc::new(config),
                coordinator,
            },
        }
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.ctx.coordinator.clone()
    }

    pub fn mode(&self) -> OperatingMode {
        self.ctx.config.mode
    }

    /// Start what the operating mode selects. Returns once the server is
    /// bound and every queue has started.
    pub async fn start(&self) -> Result<Started<L::Server>, StartupError> {
        let mode = self.mode();
        tracing::info!(service = "server", mode = %mode, "Starting engine");

        let started = match mode {
            OperatingMode::ServerOnly => Started {
                server: Some(self.launcher.start_server(&self.ctx).await?),
                queues: Vec::new(),
            },
            OperatingMode::WorkerOnly => Started {
                server: None,
                queues: self.launcher.start_workers(&self.ctx).await?,
            },
            OperatingMode::Combined => {
                let (server, queues) = tokio::try_join!(
                    self.launcher.start_server(&self.ctx),
                    self.launcher.start_workers(&self.ctx),
                )?;
                Started {
                    server: Some(server),
                    queues,
                }
            }
        };

        tracing::info!(
            service = "server",
            mode = %mode,
            server = started.server.is_some(),
            queues = started.queues.len(),
            "Engine started"
        );
        Ok(started)
    }

    /// Drain queues, then give the server its drain window.
    pub async fn shutdown(&self, started: Started<L::Server>, reason: &str) -> ShutdownReport {
        let report = self.ctx.coordinator.drain(reason).await;
        if let Some(server) = started.server {
            let drain = Duration::from_millis(self.ctx.config.shutdown.http_drain_ms);
            self.launcher.stop_server(server, drain).await;
        }
        report
    }

    /// Start, wait for `terminate`, shut down.
    ///
    /// `terminate` is watched during startup as well, so a signal arriving
    /// before everything is up still drains what was registered.
    pub async fn run<F>(&self, terminate: F) -> Result<ShutdownReport, StartupError>
    where
        F: Future<Output = ()> + Send,
    {
        self.run_until(terminate, std::future::pending::<()>()).await
    }

    /// [`run`](Self::run), with `force` cutting the drain short.
    ///
    /// `force` is first polled once draining begins. If it completes before
    /// the drain does, the remaining closes are abandoned and the report
    /// carries exit code 1.
    pub async fn run_until<F, G>(&self, terminate: F, force: G) -> Result<ShutdownReport, StartupError>
    where
        F: Future<Output = ()> + Send,
        G: Future<Output = ()> + Send,
    {
        tokio::pin!(terminate);
        tokio::pin!(force);

        let started = tokio::select! {
            result = self.start() => match result {
                Ok(started) => started,
                Err(e) => {
                    tracing::error!(service = e.subsystem(), error = %e, "Startup failed");
                    self.ctx.coordinator.drain("startup failure").await;
                    return Err(e);
                }
            },
            () = &mut terminate => {
                tracing::warn!(service = "server", "Termination requested during startup");
                let drain = self.ctx.coordinator.drain("signal during startup");
                return Ok(Self::unless_forced(drain, force).await);
            }
        };

        terminate.await;
        Ok(Self::unless_forced(self.shutdown(started, "termination signal"), force).await)
    }

    async fn unless_forced<D, G>(drain: D, force: G) -> ShutdownReport
    where
        D: Future<Output = ShutdownReport>,
        G: Future<Output = ()>,
    {
        tokio::select! {
            report = drain => report,
            () = force => {
                tracing::error!(service = "server", "Second termination signal; abandoning drain");
                ShutdownReport::forced()
            }
        }
    }
}

/// The production launcher: real HTTP server and queue workers.
pub struct EngineLauncher {
    factory: Arc<dyn QueueFactory>,
    connections: Arc<ConnectionManager>,
}

impl EngineLauncher {
    pub fn new(factory: Arc<dyn QueueFactory>) -> Self {
        Self {
            factory,
            connections: Arc::new(ConnectionManager::new()),
        }
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }
}

#[async_trait]
impl Launcher for EngineLauncher {
    type Server = RunningServer;

    async fn start_server(&self, ctx: &EngineContext) -> Result<RunningServer, StartupError> {
        let state = AppState::new(
            ctx.config.clone(),
            ctx.coordinator.clone(),
            self.connections.clone(),
        );
        Ok(HttpServer::new().start(state).await?)
    }

    async fn start_workers(&self, ctx: &EngineContext) -> Result<Vec<QueueHandle>, StartupError> {
        Ok(WorkerBootstrapper::new(self.factory.clone())
            .start(&ctx.coordinator)
            .await?)
    }

    async fn stop_server(&self, server: RunningServer, drain: Duration) {
        server.stop(drain).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::QueueName;

    #[test]
    fn every_startup_error_exits_one() {
        let errors = [
            StartupError::Worker(QueueError::Closed(QueueName::SendWebhook)),
            StartupError::Io(std::io::Error::other("boom")),
            StartupError::Config(ConfigError::Validation(Vec::new())),
        ];
        for e in errors {
            assert_eq!(e.exit_code(), 1);
        }
    }

    #[test]
    fn subsystem_labels() {
        assert_eq!(StartupError::Worker(QueueError::Closed(QueueName::NonceResync)).subsystem(), "worker");
        assert_eq!(StartupError::Io(std::io::Error::other("x")).subsystem(), "server");
    }
}
