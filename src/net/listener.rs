//! Listener binding.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::schema::BIND_HOST;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {addr}: {reason}")]
    Address { addr: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bind `0.0.0.0:<port>`. Port 0 picks a free port.
pub async fn bind(port: u16) -> Result<TcpListener, ListenerError> {
    let addr = format!("{BIND_HOST}:{port}");
    let socket: SocketAddr = addr.parse().map_err(|e: std::net::AddrParseError| ListenerError::Address {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;

    let listener = TcpListener::bind(socket)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })?;
    Ok(listener)
}
