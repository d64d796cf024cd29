//! Transaction status subscriptions over WebSocket.
//!
//! # Data Flow
//! ```text
//! GET /transaction/status/ws/{request_id}  (upgrade)
//!     → ConnectionManager::add(request_id) → SubscriberId
//!     → ConnectionManager::notify(request_id, status) → text frame to each socket
//!     → client close / disconnect → ConnectionManager::remove
//! ```
//!
//! Each socket has a bounded outbox. A subscriber whose outbox is full is
//! dropped on the next notify; its writer flushes what is queued and the
//! socket closes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::openapi::RouteDoc;
use crate::observability::metrics;

pub const STATUS_WS_ROUTE: &str = "/transaction/status/ws/{request_id}";

static SUBSCRIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one open socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(SUBSCRIBER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Messages queued per socket before the subscriber is dropped.
pub const OUTBOX_CAPACITY: usize = 64;

type Outbox = mpsc::Sender<String>;

#[derive(Debug)]
struct Subscriber {
    request_id: String,
    outbox: Outbox,
}

/// Open subscription sockets, keyed by subscriber.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    subscribers: DashMap<SubscriberId, Subscriber>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket's outbox for `request_id`.
    pub fn add(&self, request_id: &str, outbox: Outbox) -> SubscriberId {
        let id = SubscriberId::next();
        self.subscribers.insert(
            id,
            Subscriber {
                request_id: request_id.to_string(),
                outbox,
            },
        );
        metrics::set_ws_connections(self.count());
        id
    }

    pub fn remove(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
        metrics::set_ws_connections(self.count());
    }

    /// Push `payload` to every subscriber of `request_id`. Returns the number
    /// of sockets it was queued for. Sockets already gone, or too slow to
    /// keep their outbox below capacity, are dropped.
    pub fn notify(&self, request_id: &str, payload: &serde_json::Value) -> usize {
        let text = payload.to_string();
        let mut delivered = 0;
        self.subscribers.retain(|id, sub| {
            if sub.request_id != request_id {
                return true;
            }
            match sub.outbox.try_send(text.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(service = "server", subscriber = %id, request_id = %request_id, "Status subscriber too slow; dropping it");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        metrics::set_ws_connections(self.count());
        delivered
    }

    /// Total open sockets.
    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn subscribed(&self, request_id: &str) -> usize {
        self.subscribers
            .iter()
            .filter(|entry| entry.value().request_id == request_id)
            .count()
    }

    /// Request ids with at least one open socket, and their socket counts.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.subscribers.iter() {
            *counts.entry(entry.value().request_id.clone()).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}

async fn status_socket(
    ws: WebSocketUpgrade,
    Path(request_id): Path<String>,
    State(manager): State<Arc<ConnectionManager>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, request_id, manager))
}

async fn serve_subscriber(socket: WebSocket, request_id: String, manager: Arc<ConnectionManager>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);

    let ack = json!({ "type": "subscribed", "requestId": request_id });
    let _ = tx.try_send(ack.to_string());

    let id = manager.add(&request_id, tx);
    tracing::debug!(service = "server", subscriber = %id, request_id = %request_id, "Status subscriber connected");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    manager.remove(id);
    writer.abort();
    tracing::debug!(service = "server", subscriber = %id, request_id = %request_id, "Status subscriber disconnected");
}

/// Step 9: the status subscription endpoint.
pub struct Streaming;

impl Capability for Streaming {
    fn step(&self) -> CompositionStep {
        CompositionStep::Streaming
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let manager = app.state().connections.clone();
        app.routes(
            Router::new()
                .route(STATUS_WS_ROUTE, get(status_socket))
                .with_state(manager),
            &[RouteDoc::new(
                "get",
                STATUS_WS_ROUTE,
                "Subscribe to transaction status updates",
                "Transaction",
            )],
        );
        Ok(())
    }
}
