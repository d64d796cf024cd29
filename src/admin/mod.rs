//! Administrative API, guarded by `ADMIN_API_KEY`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::openapi::RouteDoc;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    let key: Option<Arc<str>> = state.config.security.admin_api_key.as_deref().map(Arc::from);
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/usage", get(get_usage))
        .route("/admin/subscriptions", get(get_subscriptions))
        .route("/admin/queues", get(get_queues))
        .layer(middleware::from_fn_with_state(key, admin_auth_middleware))
        .with_state(state)
}

/// Step 13: admin routes.
pub struct AdminRoutes;

impl Capability for AdminRoutes {
    fn step(&self) -> CompositionStep {
        CompositionStep::AdminRoutes
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        if app.state().config.security.admin_api_key.is_none() {
            tracing::warn!(service = "server", "ADMIN_API_KEY not set; admin routes will reject all requests");
        }
        let router = setup_admin_router(app.state().clone());
        app.routes(
            router,
            &[
                RouteDoc::new("get", "/admin/status", "Engine status", "Admin"),
                RouteDoc::new("get", "/admin/usage", "Request usage counters", "Admin"),
                RouteDoc::new("get", "/admin/subscriptions", "Open status subscriptions", "Admin"),
                RouteDoc::new("get", "/admin/queues", "Queue lifecycle states", "Admin"),
            ],
        );
        Ok(())
    }
}
