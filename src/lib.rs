//! Engine host: process lifecycle for one HTTP API and eight queue consumers.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── engine ───────────────────────────┐
//!                 │                                                           │
//!   ENGINE_MODE ──┼─▶ lifecycle::startup ──┬─▶ http (13 composed steps) ──┐   │
//!                 │                        │                             │   │
//!                 │                        └─▶ worker (8 queues) ────────┤   │
//!                 │                                                      ▼   │
//!   SIGINT/TERM ──┼─▶ lifecycle::shutdown: close queues in order, drain HTTP │
//!                 └───────────────────────────────────────────────────────────┘
//!
//!   setup-db ──▶ db: probe sentinel → release pool → deploy (if absent) → generate
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod worker;

// Process control
pub mod db;
pub mod lifecycle;

// Cross-cutting concerns
pub mod admin;
pub mod observability;
pub mod security;

pub use config::EngineConfig;
pub use http::HttpServer;
pub use lifecycle::{Orchestrator, StartupError};
