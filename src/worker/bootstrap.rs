//! Worker bootstrapper.
//!
//! Starts one consumer per [`QueueName`] and makes each discoverable for
//! shutdown. Payload handling and retry policy belong to the consumers.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::WorkerConfig;
use crate::lifecycle::shutdown::ShutdownCoordinator;
use crate::worker::local::{JobHandler, LocalQueue};
use crate::worker::queue::{QueueConsumer, QueueError, QueueHandle, QueueName};

/// Obtains the consumer for a queue.
pub trait QueueFactory: Send + Sync {
    fn build(&self, name: QueueName) -> Result<Arc<dyn QueueConsumer>, QueueError>;
}

/// Builds [`LocalQueue`] consumers sharing one job handler, and keeps them
/// reachable so producers can enqueue.
pub struct LocalQueueFactory {
    config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
    built: DashMap<QueueName, Arc<LocalQueue>>,
}

impl LocalQueueFactory {
    pub fn new(config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            config,
            handler,
            built: DashMap::new(),
        }
    }

    /// The queue built for `name`, if the bootstrapper has created it.
    pub fn queue(&self, name: QueueName) -> Option<Arc<LocalQueue>> {
        self.built.get(&name).map(|q| q.value().clone())
    }
}

impl QueueFactory for LocalQueueFactory {
    fn build(&self, name: QueueName) -> Result<Arc<dyn QueueConsumer>, QueueError> {
        let queue = self
            .built
            .entry(name)
            .or_insert_with(|| Arc::new(LocalQueue::new(name, &self.config, self.handler.clone())))
            .value()
            .clone();
        Ok(queue)
    }
}

/// Starts the fixed set of queue consumers.
pub struct WorkerBootstrapper {
    factory: Arc<dyn QueueFactory>,
}

impl WorkerBootstrapper {
    pub fn new(factory: Arc<dyn QueueFactory>) -> Self {
        Self { factory }
    }

    /// Start every queue in [`QueueName::ALL`] order and register each handle
    /// with `coordinator`.
    ///
    /// Stops at the first failure. Queues started before it stay registered,
    /// so a later drain still closes them.
    pub async fn start(
        &self,
        coordinator: &ShutdownCoordinator,
    ) -> Result<Vec<QueueHandle>, QueueError> {
        tracing::info!(service = "worker", queues = QueueName::ALL.len(), "Initializing workers");

        let mut handles = Vec::with_capacity(QueueName::ALL.len());
        for name in QueueName::ALL {
            let consumer = self.factory.build(name)?;
            consumer.start().await?;

            let handle = QueueHandle::running(consumer);
            coordinator.register(handle.clone());
            handles.push(handle);
        }

        tracing::info!(service = "worker", "Workers ready");
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::local::{Job, LoggingHandler};
    use async_trait::async_trait;
    use std::time::Duration;

    fn local_factory() -> Arc<LocalQueueFactory> {
        Arc::new(LocalQueueFactory::new(
            WorkerConfig::default(),
            Arc::new(LoggingHandler),
        ))
    }

    #[tokio::test]
    async fn starts_and_registers_every_queue() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let factory = local_factory();
        let handles = WorkerBootstrapper::new(factory.clone())
            .start(&coordinator)
            .await
            .unwrap();

        let names: Vec<_> = handles.iter().map(QueueHandle::name).collect();
        assert_eq!(names, QueueName::ALL.to_vec());
        assert_eq!(coordinator.handles().len(), 8);

        let queue = factory.queue(QueueName::SendWebhook).unwrap();
        queue.enqueue(Job::new(serde_json::json!({}))).await.unwrap();

        let report = coordinator.drain("test").await;
        assert!(report.all_clean());
        assert_eq!(queue.processed(), 1);
    }

    struct FailOn(QueueName);

    #[async_trait]
    impl QueueConsumer for FailOn {
        fn name(&self) -> QueueName {
            self.0
        }

        async fn start(&self) -> Result<(), QueueError> {
            Err(QueueError::Start {
                queue: self.0,
                reason: "connection refused".to_string(),
            })
        }

        async fn close(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    struct PartlyBroken {
        inner: Arc<LocalQueueFactory>,
        broken: QueueName,
    }

    impl QueueFactory for PartlyBroken {
        fn build(&self, name: QueueName) -> Result<Arc<dyn QueueConsumer>, QueueError> {
            if name == self.broken {
                Ok(Arc::new(FailOn(name)))
            } else {
                self.inner.build(name)
            }
        }
    }

    #[tokio::test]
    async fn start_failure_keeps_earlier_handles_registered() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let factory = Arc::new(PartlyBroken {
            inner: local_factory(),
            broken: QueueName::ProcessEventLogs,
        });

        let err = WorkerBootstrapper::new(factory)
            .start(&coordinator)
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Start { queue: QueueName::ProcessEventLogs, .. }));
        assert_eq!(coordinator.handles().len(), 2);
        assert!(coordinator.drain("test").await.all_clean());
    }
}
