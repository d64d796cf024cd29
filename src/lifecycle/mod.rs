//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Mode (mode.rs) → server and/or workers → "Engine started"
//!
//! Steady state (faults.rs):
//!     panics and background task errors → logged, counted, process continues
//!
//! Shutdown (signals.rs → shutdown.rs):
//!     SIGTERM/SIGINT → broadcast stop → close queues in SHUTDOWN_ORDER
//!     → HTTP drain window → exit 0
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, close queues, drain HTTP
//! - Every queue close has its own deadline
//! - Shutdown never fails the process: outcomes are reported, exit stays 0

pub mod faults;
pub mod mode;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use mode::OperatingMode;
pub use shutdown::{ShutdownCoordinator, ShutdownReport, SHUTDOWN_ORDER};
pub use startup::{EngineLauncher, Launcher, Orchestrator, StartupError};
