//! Queue worker subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     bootstrap.rs (for each QueueName, in start order)
//!     → QueueFactory::build → consumer.start()
//!     → QueueHandle (running) registered with the ShutdownCoordinator
//!
//! Steady state:
//!     producers → LocalQueue::enqueue → dispatcher → JobHandler
//!
//! Shutdown:
//!     ShutdownCoordinator → QueueHandle::close (running → closing → closed)
//! ```

pub mod bootstrap;
pub mod local;
pub mod queue;

pub use bootstrap::{LocalQueueFactory, QueueFactory, WorkerBootstrapper};
pub use local::{Job, JobHandler, LocalQueue, LoggingHandler};
pub use queue::{QueueConsumer, QueueError, QueueHandle, QueueName, QueueState};
