//! Queue names, the consumer contract, and lifecycle-tracked handles.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// The eight collaborator queues this engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    SendTransaction,
    MineTransaction,
    ProcessEventLogs,
    ProcessTransactionReceipts,
    SendWebhook,
    NonceResync,
    CancelRecycledNonces,
    PruneTransactions,
}

impl QueueName {
    /// Start order used by the worker bootstrapper.
    pub const ALL: [QueueName; 8] = [
        QueueName::SendTransaction,
        QueueName::MineTransaction,
        QueueName::ProcessEventLogs,
        QueueName::ProcessTransactionReceipts,
        QueueName::SendWebhook,
        QueueName::NonceResync,
        QueueName::CancelRecycledNonces,
        QueueName::PruneTransactions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::SendTransaction => "send-transaction",
            QueueName::MineTransaction => "mine-transaction",
            QueueName::ProcessEventLogs => "process-event-logs",
            QueueName::ProcessTransactionReceipts => "process-transaction-receipts",
            QueueName::SendWebhook => "send-webhook",
            QueueName::NonceResync => "nonce-resync",
            QueueName::CancelRecycledNonces => "cancel-recycled-nonces",
            QueueName::PruneTransactions => "prune-transactions",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by queue consumers.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {queue} failed to start: {reason}")]
    Start { queue: QueueName, reason: String },

    #[error("queue {queue} failed to close: {reason}")]
    Close { queue: QueueName, reason: String },

    #[error("queue {0} is closed")]
    Closed(QueueName),
}

/// Contract every collaborator queue consumer fulfils.
///
/// `close` must be awaitable and finish in finite time; the shutdown
/// coordinator still bounds it with a deadline.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn name(&self) -> QueueName;

    /// Begin consuming jobs.
    async fn start(&self) -> Result<(), QueueError>;

    /// Stop intake and finish in-flight work.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Lifecycle state of a queue handle. Moves only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Running,
    Closing,
    Closed,
}

impl QueueState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => QueueState::Running,
            1 => QueueState::Closing,
            _ => QueueState::Closed,
        }
    }
}

/// Result of asking a handle to close.
#[derive(Debug)]
pub enum CloseAttempt {
    /// This call performed the close.
    Performed(Result<(), QueueError>),
    /// Another call already closed (or is closing) the queue.
    AlreadyClosing,
}

/// Reference to a running consumer, shared between the bootstrapper, the
/// shutdown coordinator and the admin API.
#[derive(Clone)]
pub struct QueueHandle {
    consumer: Arc<dyn QueueConsumer>,
    state: Arc<AtomicU8>,
}

impl QueueHandle {
    /// Wrap a consumer that has already been started.
    pub fn running(consumer: Arc<dyn QueueConsumer>) -> Self {
        Self {
            consumer,
            state: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn name(&self) -> QueueName {
        self.consumer.name()
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Close the consumer once. Only the first caller invokes the consumer;
    /// the handle ends `Closed` whether or not the close succeeded.
    pub async fn close(&self) -> CloseAttempt {
        if self
            .state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return CloseAttempt::AlreadyClosing;
        }

        let result = self.consumer.close().await;
        self.state.store(2, Ordering::SeqCst);
        CloseAttempt::Performed(result)
    }

    /// Mark the handle closed without invoking the consumer. Used when a
    /// close attempt was abandoned at its deadline.
    pub(crate) fn mark_closed(&self) {
        self.state.store(2, Ordering::SeqCst);
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        closes: AtomicUsize,
    }

    #[async_trait]
    impl QueueConsumer for Counting {
        fn name(&self) -> QueueName {
            QueueName::SendWebhook
        }

        async fn start(&self) -> Result<(), QueueError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), QueueError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let consumer = Arc::new(Counting {
            closes: AtomicUsize::new(0),
        });
        let handle = QueueHandle::running(consumer.clone());
        assert_eq!(handle.state(), QueueState::Running);

        assert!(matches!(handle.close().await, CloseAttempt::Performed(Ok(()))));
        assert_eq!(handle.state(), QueueState::Closed);

        assert!(matches!(handle.close().await, CloseAttempt::AlreadyClosing));
        assert_eq!(consumer.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = QueueName::ALL.iter().map(|q| q.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
    }
}
