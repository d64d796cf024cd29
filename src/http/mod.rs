//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! compose.rs: capability steps, in COMPOSITION_ORDER
//!     error.rs → logs.rs → security::* → usage.rs → metrics.rs
//!     → websocket.rs → security::auth → openapi.rs → routes.rs → admin
//! server.rs: TLS → compose → bind → serve until the shutdown broadcast
//! ```

pub mod compose;
pub mod error;
pub mod logs;
pub mod metrics;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod usage;
pub mod websocket;

pub use compose::{Capability, ComposeError, CompositionStep, ServerComposer, COMPOSITION_ORDER};
pub use error::ApiError;
pub use server::{AppState, HttpServer, RunningServer, ServerError};
pub use websocket::ConnectionManager;
