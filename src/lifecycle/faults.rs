//! Runtime fault handling.
//!
//! Steady-state faults are logged and the process keeps running. Panics go
//! through a process-wide hook; background tasks started through
//! [`spawn_supervised`] have their errors and panics logged instead of being
//! silently dropped with the join handle.

use std::future::Future;
use std::panic;

use tokio::task::JoinHandle;

use crate::observability::metrics;

/// Install the panic hook. Call once, after logging is initialised.
///
/// The previous hook is not chained: the default hook writes to stderr, and
/// every fault should go through the structured log instead.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let thread = std::thread::current();

        tracing::error!(
            service = "server",
            thread = thread.name().unwrap_or("unnamed"),
            location = %location,
            error = %payload,
            "Uncaught panic"
        );
        metrics::record_runtime_fault("panic");
    }));
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn a background task whose failure is logged, never propagated.
///
/// Aborting the returned handle aborts the task itself.
pub fn spawn_supervised<F, E>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let inner = tokio::spawn(task);
    tokio::spawn(async move {
        let mut inner = AbortOnDrop(inner);
        match (&mut inner.0).await {
            Ok(Ok(())) => {
                tracing::debug!(service = "server", task = name, "Background task finished");
            }
            Ok(Err(e)) => {
                tracing::error!(service = "server", task = name, error = %e, "Unhandled background task error");
                metrics::record_runtime_fault("task_error");
            }
            Err(e) if e.is_panic() => {
                tracing::error!(service = "server", task = name, error = %e, "Background task panicked");
                metrics::record_runtime_fault("task_panic");
            }
            Err(e) => {
                tracing::debug!(service = "server", task = name, error = %e, "Background task cancelled");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn supervisor_survives_task_error() {
        let handle = spawn_supervised("failing", async { Err::<(), _>("boom") });
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn supervisor_survives_task_panic() {
        let handle = spawn_supervised("panicking", async {
            if true {
                panic!("injected");
            }
            Ok::<(), String>(())
        });
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn aborting_supervisor_aborts_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = spawn_supervised("pending", async move {
            let _tx = tx;
            std::future::pending::<()>().await;
            Ok::<(), String>(())
        });
        tokio::task::yield_now().await;
        handle.abort();
        // The sender is dropped once the inner task is cancelled.
        assert!(rx.await.is_err());
    }
}
