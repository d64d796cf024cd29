//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! engine.toml (optional)
//!     → loader.rs (parse & deserialize)
//!     → environment overlay (.env / process env)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is read once at process start and never changes afterwards
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::EngineConfig;
pub use schema::RateLimitConfig;
pub use schema::WorkerConfig;
