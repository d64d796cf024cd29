//! Database schema bootstrap.
//!
//! # Data Flow
//! ```text
//! setup-db:
//!     postgres.rs: probe pg_tables for the sentinel → release pool (acknowledged)
//!     bootstrap.rs: sentinel absent → tool.rs `migrate deploy`
//!                   always        → tool.rs `generate`
//! ```
//!
//! # Design Decisions
//! - Skip-if-exists: a provisioned database is never reset
//! - The probe pool is closed and confirmed closed before the tool runs
//! - Every failure is fatal to the bootstrap

pub mod bootstrap;
pub mod postgres;
pub mod tool;

pub use bootstrap::{BootstrapError, BootstrapOutcome, DbBootstrap, SchemaStore, SchemaTool};
pub use postgres::PgSchemaStore;
pub use tool::CommandTool;
