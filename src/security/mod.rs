//! Request hardening capabilities.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening response headers)
//!     → cors.rs (origin policy)
//!     → rate_limit.rs (per-client token bucket)
//!     → engine_mode.rs (sandbox: read-only)
//!     → auth.rs (bearer token, public paths bypass)
//!     → routes
//! ```
//!
//! # Design Decisions
//! - Fail closed: a misconfigured policy aborts composition
//! - Rejections use the shared JSON error shape

pub mod auth;
pub mod cors;
pub mod engine_mode;
pub mod headers;
pub mod rate_limit;
