//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub engine_version: &'static str,
    pub hosted_documents: usize,
    pub live_documents: usize,
    pub connections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine_version: grove_engine::VERSION,
        hosted_documents: state.documents.len(),
        live_documents: state.conn_manager.document_count(),
        connections: state.conn_manager.connection_count(),
    })
}

async fn root() -> &'static str {
    "Grove Relay Server"
}
