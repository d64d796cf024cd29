//! HTTP server startup and serving.
//!
//! # Responsibilities
//! - Load TLS material when HTTPS is enabled
//! - Compose the router through [`ServerComposer`]
//! - Bind `0.0.0.0:<port>` and serve plain HTTP or HTTPS
//! - Stop accepting on the coordinator's broadcast and drain within a window

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::http::compose::{ComposeError, ServerComposer};
use crate::http::openapi::{self, OPENAPI_OUTPUT};
use crate::http::usage::{self, UsageTracker};
use crate::http::websocket::ConnectionManager;
use crate::lifecycle::faults::spawn_supervised;
use crate::lifecycle::shutdown::ShutdownCoordinator;
use crate::net::listener::{self, ListenerError};
use crate::net::tls::{self, TlsError};

/// Shared state handed to every capability and handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub connections: Arc<ConnectionManager>,
    pub usage: Arc<UsageTracker>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<EngineConfig>,
        coordinator: Arc<ShutdownCoordinator>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            config,
            connections,
            usage: Arc::new(UsageTracker::new()),
            coordinator,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A server that has bound its port and is accepting connections.
pub struct RunningServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for in-flight requests to finish, up to `drain`. Connections
    /// still open after the window are dropped.
    ///
    /// The caller must have broadcast the stop signal first.
    pub async fn stop(self, drain: Duration) {
        let mut task = self.task;
        match tokio::time::timeout(drain, &mut task).await {
            Ok(_) => {
                tracing::info!(service = "server", "HTTP server stopped");
            }
            Err(_) => {
                tracing::warn!(service = "server", drain_ms = drain.as_millis() as u64, "Drain window elapsed; dropping open connections");
                task.abort();
            }
        }
    }
}

/// Builds and starts the HTTP server.
pub struct HttpServer {
    composer: ServerComposer,
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServer {
    pub fn new() -> Self {
        Self {
            composer: ServerComposer::standard(),
        }
    }

    pub fn with_composer(composer: ServerComposer) -> Self {
        Self { composer }
    }

    /// Load TLS, compose, bind, then serve in the background.
    pub async fn start(self, state: AppState) -> Result<RunningServer, ServerError> {
        let config = state.config.clone();
        let coordinator = state.coordinator.clone();

        let tls = if config.listener.https.enabled {
            Some(tls::load_tls_config(&config.listener.https).await?)
        } else {
            None
        };

        let usage = state.usage.clone();
        let composed = self.composer.compose(state)?;

        let listener = listener::bind(config.listener.port).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            service = "server",
            address = %local_addr,
            https = tls.is_some(),
            "Listening for connections"
        );

        if let Err(e) = openapi::write_document(&composed.openapi, Path::new(OPENAPI_OUTPUT)) {
            tracing::warn!(service = "server", path = OPENAPI_OUTPUT, error = %e, "Failed to write OpenAPI document");
        }

        let flush_secs = config.observability.usage_flush_secs;
        if flush_secs > 0 {
            tokio::spawn(usage::flush_periodically(
                usage,
                Duration::from_secs(flush_secs),
                coordinator.subscribe(),
            ));
        }

        let drain = Duration::from_millis(config.shutdown.http_drain_ms);
        let task = match tls {
            None => serve_plain(listener, composed.router, &coordinator),
            Some(tls) => serve_tls(listener, composed.router, tls, &coordinator, drain)?,
        };

        Ok(RunningServer { local_addr, task })
    }
}

fn serve_plain(
    listener: TcpListener,
    router: Router,
    coordinator: &ShutdownCoordinator,
) -> JoinHandle<()> {
    let mut shutdown = coordinator.subscribe();
    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    spawn_supervised("http-server", async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!(service = "server", "HTTP server no longer accepting connections");
            })
            .await
    })
}

fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: axum_server::tls_rustls::RustlsConfig,
    coordinator: &ShutdownCoordinator,
    drain: Duration,
) -> Result<JoinHandle<()>, ServerError> {
    let handle = axum_server::Handle::new();
    let mut shutdown = coordinator.subscribe();
    let watcher = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        tracing::info!(service = "server", "HTTPS server no longer accepting connections");
        watcher.graceful_shutdown(Some(drain));
    });

    let listener = listener.into_std()?;
    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    let server = axum_server::from_tcp_rustls(listener, tls).handle(handle);
    Ok(spawn_supervised("https-server", async move { server.serve(app).await }))
}
