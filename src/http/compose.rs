//! Server composition.
//!
//! The HTTP server is built by applying capability steps, one at a time, to
//! a shared [`ServerApp`]. The step order is data ([`COMPOSITION_ORDER`]) and
//! is enforced: a capability list that deviates from it is rejected before
//! anything runs.
//!
//! # Request-time nesting
//! ```text
//! request ─▶ [1 error handler ─▶ [2 logging ─▶ ... ─▶ [10 auth ─▶ routes]]]
//! ```
//! Middleware registered by an earlier step wraps everything registered by
//! later steps, so the error handler sees failures from every layer below it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use axum::Router;
use serde::Serialize;
use thiserror::Error;

use crate::http::error::{not_found, ErrorHandler};
use crate::http::logs::RequestLogs;
use crate::http::metrics::MetricsExposition;
use crate::http::openapi::{self, ApiDocs, RouteDoc};
use crate::http::routes::BusinessRoutes;
use crate::http::server::AppState;
use crate::http::usage::UsageReporting;
use crate::http::websocket::Streaming;
use crate::admin::AdminRoutes;
use crate::security::auth::Authentication;
use crate::security::cors::Cors;
use crate::security::engine_mode::ModeEnforcement;
use crate::security::headers::SecurityHeaders;
use crate::security::rate_limit::RateLimit;

/// One named step of server composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStep {
    ErrorHandler,
    RequestLogging,
    SecurityHeaders,
    Cors,
    RateLimit,
    ModeEnforcement,
    UsageAccounting,
    Metrics,
    Streaming,
    Authentication,
    ApiDocs,
    Routes,
    AdminRoutes,
}

/// The order capability steps are applied in.
pub const COMPOSITION_ORDER: [CompositionStep; 13] = [
    CompositionStep::ErrorHandler,
    CompositionStep::RequestLogging,
    CompositionStep::SecurityHeaders,
    CompositionStep::Cors,
    CompositionStep::RateLimit,
    CompositionStep::ModeEnforcement,
    CompositionStep::UsageAccounting,
    CompositionStep::Metrics,
    CompositionStep::Streaming,
    CompositionStep::Authentication,
    CompositionStep::ApiDocs,
    CompositionStep::Routes,
    CompositionStep::AdminRoutes,
];

impl CompositionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            CompositionStep::ErrorHandler => "error_handler",
            CompositionStep::RequestLogging => "request_logging",
            CompositionStep::SecurityHeaders => "security_headers",
            CompositionStep::Cors => "cors",
            CompositionStep::RateLimit => "rate_limit",
            CompositionStep::ModeEnforcement => "mode_enforcement",
            CompositionStep::UsageAccounting => "usage_accounting",
            CompositionStep::Metrics => "metrics",
            CompositionStep::Streaming => "streaming",
            CompositionStep::Authentication => "authentication",
            CompositionStep::ApiDocs => "api_docs",
            CompositionStep::Routes => "routes",
            CompositionStep::AdminRoutes => "admin_routes",
        }
    }
}

impl fmt::Display for CompositionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while composing the server. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("composition step {position} must be {expected}, found {found}")]
    OutOfOrder {
        position: usize,
        expected: CompositionStep,
        found: CompositionStep,
    },

    #[error("expected {expected} composition steps, found {found}")]
    WrongLength { expected: usize, found: usize },

    #[error("composition step {step} failed: {reason}")]
    Step {
        step: CompositionStep,
        reason: String,
    },

    #[error("composition step {step} panicked: {reason}")]
    Panicked {
        step: CompositionStep,
        reason: String,
    },
}

impl ComposeError {
    pub fn step(step: CompositionStep, reason: impl Into<String>) -> Self {
        ComposeError::Step {
            step,
            reason: reason.into(),
        }
    }
}

/// A unit of server behavior applied during composition.
pub trait Capability: Send + Sync {
    fn step(&self) -> CompositionStep;

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError>;
}

type Wrap = Box<dyn FnOnce(Router) -> Router + Send>;

/// The server instance under composition.
pub struct ServerApp {
    state: AppState,
    routes: Router,
    layers: Vec<(CompositionStep, Wrap)>,
    docs: Vec<RouteDoc>,
    openapi: Arc<OnceLock<serde_json::Value>>,
    current: CompositionStep,
    applied: Vec<CompositionStep>,
}

impl ServerApp {
    fn new(state: AppState) -> Self {
        Self {
            state,
            routes: Router::new(),
            layers: Vec::new(),
            docs: Vec::new(),
            openapi: Arc::new(OnceLock::new()),
            current: COMPOSITION_ORDER[0],
            applied: Vec::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Register middleware. It wraps every route, including routes added by
    /// later steps, and sits inside the middleware of earlier steps.
    pub fn wrap<F>(&mut self, f: F)
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        self.layers.push((self.current, Box::new(f)));
    }

    /// Merge routes and record their documentation.
    pub fn routes(&mut self, router: Router, docs: &[RouteDoc]) {
        let routes = std::mem::take(&mut self.routes);
        self.routes = routes.merge(router);
        self.docs.extend_from_slice(docs);
    }

    /// Slot the generated OpenAPI document is published into once
    /// composition finishes.
    pub fn openapi_slot(&self) -> Arc<OnceLock<serde_json::Value>> {
        self.openapi.clone()
    }

    fn finish(self) -> ComposedServer {
        let document = openapi::document(&self.docs);
        let _ = self.openapi.set(document.clone());

        let mut router = self.routes.fallback(not_found);
        // Innermost first, so the first step ends up outermost.
        for (_, wrap) in self.layers.into_iter().rev() {
            router = wrap(router);
        }

        ComposedServer {
            router,
            applied: self.applied,
            openapi: document,
        }
    }
}

/// Result of a successful composition.
pub struct ComposedServer {
    pub router: Router,
    pub applied: Vec<CompositionStep>,
    pub openapi: serde_json::Value,
}

/// Applies capabilities in [`COMPOSITION_ORDER`].
pub struct ServerComposer {
    capabilities: Vec<Box<dyn Capability>>,
}

impl ServerComposer {
    /// The production capability chain.
    pub fn standard() -> Self {
        Self {
            capabilities: vec![
                Box::new(ErrorHandler),
                Box::new(RequestLogs),
                Box::new(SecurityHeaders),
                Box::new(Cors),
                Box::new(RateLimit),
                Box::new(ModeEnforcement),
                Box::new(UsageReporting),
                Box::new(MetricsExposition),
                Box::new(Streaming),
                Box::new(Authentication),
                Box::new(ApiDocs),
                Box::new(BusinessRoutes),
                Box::new(AdminRoutes),
            ],
        }
    }

    /// A custom chain. Rejected unless it matches [`COMPOSITION_ORDER`].
    pub fn with_capabilities(capabilities: Vec<Box<dyn Capability>>) -> Result<Self, ComposeError> {
        check_order(&capabilities)?;
        Ok(Self { capabilities })
    }

    /// Swap the capability occupying `capability.step()`.
    pub fn replace(mut self, capability: Box<dyn Capability>) -> Self {
        let step = capability.step();
        if let Some(slot) = self.capabilities.iter_mut().find(|c| c.step() == step) {
            *slot = capability;
        }
        self
    }

    pub fn steps(&self) -> Vec<CompositionStep> {
        self.capabilities.iter().map(|c| c.step()).collect()
    }

    /// Apply every step in order. The first failure aborts composition.
    pub fn compose(self, state: AppState) -> Result<ComposedServer, ComposeError> {
        check_order(&self.capabilities)?;

        let mut app = ServerApp::new(state);
        for capability in &self.capabilities {
            let step = capability.step();
            app.current = step;
            tracing::debug!(service = "server", step = %step, "Applying composition step");

            match catch_unwind(AssertUnwindSafe(|| capability.apply(&mut app))) {
                Ok(Ok(())) => app.applied.push(step),
                Ok(Err(e)) => return Err(e),
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    return Err(ComposeError::Panicked { step, reason });
                }
            }
        }

        tracing::info!(service = "server", steps = app.applied.len(), "Server composed");
        Ok(app.finish())
    }
}

fn check_order(capabilities: &[Box<dyn Capability>]) -> Result<(), ComposeError> {
    if capabilities.len() != COMPOSITION_ORDER.len() {
        return Err(ComposeError::WrongLength {
            expected: COMPOSITION_ORDER.len(),
            found: capabilities.len(),
        });
    }
    for (position, (capability, expected)) in capabilities.iter().zip(COMPOSITION_ORDER).enumerate() {
        let found = capability.step();
        if found != expected {
            return Err(ComposeError::OutOfOrder {
                position: position + 1,
                expected,
                found,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_chain_matches_declared_order() {
        assert_eq!(ServerComposer::standard().steps(), COMPOSITION_ORDER.to_vec());
    }

    #[test]
    fn error_handler_first_admin_last() {
        assert_eq!(COMPOSITION_ORDER[0], CompositionStep::ErrorHandler);
        assert_eq!(COMPOSITION_ORDER[12], CompositionStep::AdminRoutes);
    }
}
