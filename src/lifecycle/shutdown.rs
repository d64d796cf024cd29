//! Shutdown coordination for the engine.
//!
//! # States
//! ```text
//! Running ──drain()──▶ Draining ──all closes attempted──▶ Closed
//! ```
//!
//! Draining broadcasts the stop signal (the HTTP server stops accepting),
//! then closes every registered queue one at a time in [`SHUTDOWN_ORDER`].
//! Each close has its own deadline; a failed or stuck close is recorded and
//! the remaining queues are still closed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, OnceCell};

use crate::observability::metrics;
use crate::worker::queue::{CloseAttempt, QueueHandle, QueueName};

/// Fixed order in which queues are closed.
pub const SHUTDOWN_ORDER: [QueueName; 8] = [
    QueueName::SendWebhook,
    QueueName::ProcessEventLogs,
    QueueName::ProcessTransactionReceipts,
    QueueName::SendTransaction,
    QueueName::MineTransaction,
    QueueName::CancelRecycledNonces,
    QueueName::PruneTransactions,
    QueueName::NonceResync,
];

fn shutdown_rank(name: QueueName) -> usize {
    SHUTDOWN_ORDER
        .iter()
        .position(|q| *q == name)
        .unwrap_or(SHUTDOWN_ORDER.len())
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Running,
    Draining,
    Closed,
}

/// What happened to one queue during shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
    Failed { error: String },
    TimedOut { after_ms: u64 },
}

impl CloseOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, CloseOutcome::Closed | CloseOutcome::AlreadyClosed)
    }
}

/// Per-queue result of a drain, in the order the closes were attempted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub queues: Vec<(QueueName, CloseOutcome)>,
    /// The drain was abandoned by a second termination signal.
    pub forced: bool,
}

impl ShutdownReport {
    /// Report for a drain cut short before it finished.
    pub fn forced() -> Self {
        Self {
            queues: Vec::new(),
            forced: true,
        }
    }

    pub fn all_clean(&self) -> bool {
        !self.forced && self.queues.iter().all(|(_, outcome)| outcome.is_clean())
    }

    /// Process exit status after shutdown. Close failures never change it;
    /// an abandoned drain exits 1.
    pub fn exit_code(&self) -> i32 {
        if self.forced {
            1
        } else {
            0
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Holds the broadcast channel long-running tasks subscribe to, and the
/// queue handles registered by the worker bootstrapper.
pub struct ShutdownCoordinator {
    tx: broadcast::Sender<()>,
    handles: Mutex<Vec<QueueHandle>>,
    state: AtomicU8,
    close_timeout: Duration,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose queue closes each get `close_timeout`.
    pub fn new(close_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            handles: Mutex::new(Vec::new()),
            state: AtomicU8::new(0),
            close_timeout,
            report: OnceCell::new(),
        }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Broadcast the stop signal without draining queues.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Register a queue handle for draining.
    pub fn register(&self, handle: QueueHandle) {
        tracing::debug!(service = "shutdown", queue = %handle.name(), "Queue registered for shutdown");
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Snapshot of registered handles in registration order.
    pub fn handles(&self) -> Vec<QueueHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> CoordinatorState {
        match self.state.load(Ordering::SeqCst) {
            0 => CoordinatorState::Running,
            1 => CoordinatorState::Draining,
            _ => CoordinatorState::Closed,
        }
    }

    /// Drain every registered queue in [`SHUTDOWN_ORDER`].
    ///
    /// Concurrent and repeated calls share one drain and get the same report.
    pub async fn drain(&self, reason: &str) -> ShutdownReport {
        self.report
            .get_or_init(|| self.drain_once(reason))
            .await
            .clone()
    }

    async fn drain_once(&self, reason: &str) -> ShutdownReport {
        self.state.store(1, Ordering::SeqCst);
        tracing::info!(service = "shutdown", reason = %reason, "Received shutdown request, draining queues");

        self.trigger();

        let mut handles = self.handles();
        handles.sort_by_key(|h| shutdown_rank(h.name()));

        let mut report = ShutdownReport::default();
        for handle in handles {
            let name = handle.name();
            let outcome = self.close_one(&handle).await;
            match &outcome {
                CloseOutcome::Closed => {
                    tracing::info!(service = "shutdown", queue = %name, "Queue closed");
                }
                CloseOutcome::AlreadyClosed => {
                    tracing::debug!(service = "shutdown", queue = %name, "Queue already closed");
                }
                CloseOutcome::Failed { error } => {
                    tracing::error!(service = "shutdown", queue = %name, error = %error, "Queue failed to close");
                }
                CloseOutcome::TimedOut { after_ms } => {
                    tracing::error!(service = "shutdown", queue = %name, after_ms, "Queue close timed out");
                }
            }
            metrics::record_queue_close(name.as_str(), outcome.is_clean());
            report.queues.push((name, outcome));
        }

        self.state.store(2, Ordering::SeqCst);
        tracing::info!(
            service = "shutdown",
            queues = report.queues.len(),
            clean = report.all_clean(),
            "Shutdown drain complete"
        );
        report
    }

    async fn close_one(&self, handle: &QueueHandle) -> CloseOutcome {
        match tokio::time::timeout(self.close_timeout, handle.close()).await {
            Ok(CloseAttempt::Performed(Ok(()))) => CloseOutcome::Closed,
            Ok(CloseAttempt::Performed(Err(e))) => CloseOutcome::Failed {
                error: e.to_string(),
            },
            Ok(CloseAttempt::AlreadyClosing) => CloseOutcome::AlreadyClosed,
            Err(_) => {
                handle.mark_closed();
                CloseOutcome::TimedOut {
                    after_ms: self.close_timeout.as_millis() as u64,
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
