//! In-process queue consumer.
//!
//! A bounded job channel drained by a dispatcher task that runs up to
//! `concurrency` jobs at a time. The job logic itself belongs to a
//! [`JobHandler`] supplied by the owning collaborator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::observability::metrics;
use crate::worker::queue::{QueueConsumer, QueueError, QueueName};

/// A unit of work on a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: serde_json::Value,
}

impl Job {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }
}

/// Processes jobs for one or more queues.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, queue: QueueName, job: Job) -> Result<(), String>;
}

/// Handler that only records the job in the log.
pub struct LoggingHandler;

#[async_trait]
impl JobHandler for LoggingHandler {
    async fn handle(&self, queue: QueueName, job: Job) -> Result<(), String> {
        tracing::info!(service = "worker", queue = %queue, job_id = %job.id, "Job received");
        Ok(())
    }
}

/// Bounded in-process job queue.
pub struct LocalQueue {
    name: QueueName,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    processed: Arc<AtomicU64>,
}

impl LocalQueue {
    pub fn new(name: QueueName, config: &WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            name,
            handler,
            concurrency: config.concurrency.max(1),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            dispatcher: Mutex::new(None),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add a job. Waits while the queue is full; fails once the queue closed.
    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(QueueError::Closed(self.name))?;

        tx.send(job).await.map_err(|_| QueueError::Closed(self.name))
    }

    /// Number of jobs that finished (successfully or not).
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl QueueConsumer for LocalQueue {
    fn name(&self) -> QueueName {
        self.name
    }

    async fn start(&self) -> Result<(), QueueError> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| QueueError::Start {
                queue: self.name,
                reason: "already started".to_string(),
            })?;

        let task = tokio::spawn(dispatch(
            self.name,
            rx,
            self.handler.clone(),
            self.concurrency,
            self.processed.clone(),
        ));
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        tracing::info!(service = "worker", queue = %self.name, concurrency = self.concurrency, "Queue consumer started");
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        // Dropping the last sender lets the dispatcher finish buffered jobs and exit.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        let task = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            task.await.map_err(|e| QueueError::Close {
                queue: self.name,
                reason: e.to_string(),
            })?;
        }

        tracing::info!(service = "worker", queue = %self.name, processed = self.processed(), "Queue consumer closed");
        Ok(())
    }
}

async fn dispatch(
    name: QueueName,
    mut rx: mpsc::Receiver<Job>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    processed: Arc<AtomicU64>,
) {
    let limit = Arc::new(Semaphore::new(concurrency));
    let mut in_flight = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        let handler = handler.clone();
        let processed = processed.clone();

        in_flight.spawn(async move {
            let job_id = job.id;
            match handler.handle(name, job).await {
                Ok(()) => metrics::record_job(name.as_str(), "completed"),
                Err(reason) => {
                    tracing::warn!(service = "worker", queue = %name, job_id = %job_id, error = %reason, "Job failed");
                    metrics::record_job(name.as_str(), "failed");
                }
            }
            processed.fetch_add(1, Ordering::Relaxed);
            drop(permit);
        });

        // Reap finished jobs so the set does not grow without bound.
        while let Some(joined) = in_flight.try_join_next() {
            log_join(name, joined);
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(name, joined);
    }
}

fn log_join(name: QueueName, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(service = "worker", queue = %name, error = %e, "Job task panicked");
        metrics::record_job(name.as_str(), "panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn handle(&self, _queue: QueueName, _job: Job) -> Result<(), String> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    fn queue(handler: Arc<dyn JobHandler>) -> LocalQueue {
        let config = WorkerConfig {
            concurrency: 2,
            queue_capacity: 16,
        };
        LocalQueue::new(QueueName::PruneTransactions, &config, handler)
    }

    #[tokio::test]
    async fn close_drains_pending_jobs() {
        let q = queue(Arc::new(Slow));
        q.start().await.unwrap();

        for i in 0..6 {
            q.enqueue(Job::new(serde_json::json!({ "n": i }))).await.unwrap();
        }
        q.close().await.unwrap();

        assert_eq!(q.processed(), 6);
    }

    #[tokio::test]
    async fn enqueue_after_close_fails() {
        let q = queue(Arc::new(LoggingHandler));
        q.start().await.unwrap();
        q.close().await.unwrap();

        let err = q.enqueue(Job::new(serde_json::Value::Null)).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed(QueueName::PruneTransactions)));
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let q = queue(Arc::new(LoggingHandler));
        q.start().await.unwrap();
        assert!(matches!(q.start().await, Err(QueueError::Start { .. })));
        q.close().await.unwrap();
    }
}
