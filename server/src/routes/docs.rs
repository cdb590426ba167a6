//! Document endpoint routes.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::Result;
use crate::handlers::{
    handle_get_document, handle_pull, handle_push, handle_websocket_connection,
    validate_doc_id, DocumentResponse, PullQuery, PullResponse, PushRequest, PushResponse,
    PushSource,
};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/docs/{doc_id}", get(get_document))
        .route("/docs/{doc_id}/patches", get(pull_handler).post(push_handler))
        .route("/docs/{doc_id}/ws", get(websocket_handler))
}

/// GET /docs/{doc_id} - Current snapshot and sequence number.
async fn get_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentResponse>> {
    let response =
        handle_get_document(&state.pool, &state.documents, &state.conn_manager, &doc_id).await?;
    Ok(Json(response))
}

/// GET /docs/{doc_id}/patches - Logged patches after `since`.
async fn pull_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state.pool, &doc_id, query).await?;
    Ok(Json(response))
}

/// POST /docs/{doc_id}/patches - Apply patches to the document.
async fn push_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let source = PushSource {
        conn_manager: &state.conn_manager,
        conn_id: None,
    };
    let response = handle_push(&state.pool, &state.documents, &doc_id, request, source).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    node_id: Option<String>,
}

/// GET /docs/{doc_id}/ws - Upgrade to a live sync connection.
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response> {
    validate_doc_id(&doc_id)?;
    let node_id = query
        .node_id
        .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4()));

    Ok(ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, doc_id, node_id)))
}
