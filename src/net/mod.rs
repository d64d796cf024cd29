//! Network layer.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind 0.0.0.0:<port>)
//!     → tls.rs (optional, HTTPS key material)
//!     → http::server (plain or TLS serving)
//! ```

pub mod listener;
pub mod tls;
