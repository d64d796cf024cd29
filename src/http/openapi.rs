//! OpenAPI document generation.
//!
//! Each capability that adds routes passes a [`RouteDoc`] per route; the
//! composer builds the document once every step has run.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Map, Value};

use crate::http::compose::{Capability, ComposeError, CompositionStep, ServerApp};
use crate::http::error::ApiError;

/// Where the document is written after the server binds.
pub const OPENAPI_OUTPUT: &str = "dist/openapi.json";

/// Documentation for one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDoc {
    pub method: &'static str,
    pub path: &'static str,
    pub summary: &'static str,
    pub tag: &'static str,
}

impl RouteDoc {
    pub const fn new(
        method: &'static str,
        path: &'static str,
        summary: &'static str,
        tag: &'static str,
    ) -> Self {
        Self {
            method,
            path,
            summary,
            tag,
        }
    }
}

fn path_parameters(path: &str) -> Vec<Value> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| {
            json!({
                "name": name,
                "in": "path",
                "required": true,
                "schema": { "type": "string" }
            })
        })
        .collect()
}

/// Build an OpenAPI 3 document for `docs`.
pub fn document(docs: &[RouteDoc]) -> Value {
    let mut paths = Map::new();
    for doc in docs {
        let mut operation = json!({
            "summary": doc.summary,
            "tags": [doc.tag],
            "responses": { "200": { "description": "OK" } }
        });
        let params = path_parameters(doc.path);
        if !params.is_empty() {
            operation["parameters"] = Value::Array(params);
        }

        let entry = paths
            .entry(doc.path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        entry[doc.method] = operation;
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Engine API",
            "version": env!("CARGO_PKG_VERSION")
        },
        "components": {
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            }
        },
        "security": [{ "bearerAuth": [] }],
        "paths": Value::Object(paths)
    })
}

/// Write the document as pretty JSON, creating parent directories.
pub fn write_document(document: &Value, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(document)?;
    std::fs::write(path, body)
}

async fn serve_document(State(slot): State<Arc<OnceLock<Value>>>) -> Result<Json<Value>, ApiError> {
    slot.get()
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::internal("API document not generated"))
}

/// Step 11: `GET /json`.
pub struct ApiDocs;

impl Capability for ApiDocs {
    fn step(&self) -> CompositionStep {
        CompositionStep::ApiDocs
    }

    fn apply(&self, app: &mut ServerApp) -> Result<(), ComposeError> {
        let slot = app.openapi_slot();
        app.routes(
            Router::new().route("/json", get(serve_document)).with_state(slot),
            &[RouteDoc::new("get", "/json", "OpenAPI document", "System")],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_groups_methods_by_path() {
        let doc = document(&[
            RouteDoc::new("get", "/system/health", "Health", "System"),
            RouteDoc::new("get", "/transaction/status/ws/{request_id}", "Status", "Transaction"),
        ]);
        assert_eq!(doc["openapi"], "3.0.3");
        assert_eq!(doc["paths"]["/system/health"]["get"]["summary"], "Health");
        assert_eq!(
            doc["paths"]["/transaction/status/ws/{request_id}"]["get"]["parameters"][0]["name"],
            "request_id"
        );
    }

    #[test]
    fn writes_document_to_disk() {
        let dir = std::env::temp_dir().join(format!("engine-openapi-{}", std::process::id()));
        let path = dir.join("nested").join("openapi.json");
        write_document(&json!({ "openapi": "3.0.3" }), &path).unwrap();
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["openapi"], "3.0.3");
        std::fs::remove_dir_all(dir).unwrap();
    }
}
