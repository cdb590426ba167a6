//! WebSocket handler for live document sync.
//!
//! Handles WebSocket connections and dispatches messages to the pull and
//! push handlers while forwarding notifications from other clients.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ServerMessage};
use crate::AppState;

use super::{handle_pull, handle_push, PullQuery, PushRequest, PushSource};

/// Handle an established WebSocket connection attached to `doc_id`.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    state: AppState,
    doc_id: String,
    node_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = state
        .conn_manager
        .register(doc_id.clone(), node_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        doc_id = %doc_id,
        node_id = %node_id,
        "WebSocket client connected"
    );

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &state, &conn_id, &doc_id).await;
                state.conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
                state.conn_manager.send_to(
                    &conn_id,
                    ServerMessage::error("binary messages are not supported", None),
                );
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    state.conn_manager.unregister(&conn_id);
    send_task.abort();
    super::release_if_unwatched(&state.documents, &state.conn_manager, &doc_id);

    tracing::info!(
        conn_id = %conn_id,
        doc_id = %doc_id,
        active_connections = state.conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the reply for the sender.
async fn process_message(
    text: &str,
    state: &AppState,
    conn_id: &str,
    doc_id: &str,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Pull {
            since,
            limit,
            request_id,
        } => match handle_pull(&state.pool, doc_id, PullQuery { since, limit }).await {
            Ok(response) => ServerMessage::PullResponse {
                patches: response.patches,
                seq: response.seq,
                has_more: response.has_more,
                request_id,
            },
            Err(e) => ServerMessage::error(e.to_string(), request_id),
        },

        ClientMessage::Push {
            patches,
            request_id,
        } => {
            let node_id = state
                .conn_manager
                .node_id(conn_id)
                .unwrap_or_else(|| conn_id.to_string());
            let request = PushRequest { node_id, patches };
            let source = PushSource {
                conn_manager: &state.conn_manager,
                conn_id: Some(conn_id),
            };

            match handle_push(&state.pool, &state.documents, doc_id, request, source).await {
                Ok(response) => ServerMessage::PushResponse {
                    seq: response.seq,
                    applied: response.applied,
                    request_id,
                },
                Err(e) => ServerMessage::error(e.to_string(), request_id),
            }
        }

        ClientMessage::Ping => ServerMessage::Pong,
    }
}
