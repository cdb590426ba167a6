//! Push handler - applies client patches to a hosted document.

use grove_engine::Patch;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{lock_document, release_if_unwatched};
use crate::db;
use crate::documents::{DocumentRegistry, HostedDocument, LoggedPatch};
use crate::error::{AppError, Result};
use crate::websocket::{ConnectionManager, ServerMessage};

/// Request body for a push.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Client's node ID
    pub node_id: String,
    /// Patches in application order
    pub patches: Vec<Patch>,
}

/// Response for a push.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Document sequence number after the push
    pub seq: i64,
    /// Number of pushed patches that applied
    pub applied: usize,
}

/// Where a push came from, so its notification skips the sender.
#[derive(Debug, Clone, Copy)]
pub struct PushSource<'a> {
    pub conn_manager: &'a ConnectionManager,
    pub conn_id: Option<&'a str>,
}

/// Apply `request.patches` in order, then log and broadcast what changed.
///
/// Patches before a failing one stay applied and are logged like any other;
/// the failure is returned afterwards.
pub async fn handle_push(
    pool: &PgPool,
    registry: &DocumentRegistry,
    doc_id: &str,
    request: PushRequest,
    source: PushSource<'_>,
) -> Result<PushResponse> {
    let (shared, mut hosted) = lock_document(pool, registry, doc_id, true).await?;

    let (applied, failure) = apply_in_order(&mut hosted, &request.patches);
    let logged = hosted.drain(&request.node_id);

    if !logged.is_empty() {
        let stored = match hosted.document.snapshot() {
            Ok(snapshot) => persist(pool, doc_id, snapshot, hosted.seq, &logged).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            // Memory is ahead of storage; retire before anyone else locks it.
            registry.retire(doc_id, &shared, &mut hosted);
            return Err(e);
        }
    }
    let seq = hosted.seq;
    drop(hosted);
    drop(shared);

    tracing::debug!(
        doc_id = %doc_id,
        node_id = %request.node_id,
        pushed = request.patches.len(),
        applied,
        logged = logged.len(),
        seq,
        "Applied push"
    );

    if let Some(message) = ServerMessage::patches_available(logged) {
        source
            .conn_manager
            .broadcast_except(doc_id, source.conn_id, message);
    }
    release_if_unwatched(registry, source.conn_manager, doc_id);

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(PushResponse { seq, applied }),
    }
}

fn apply_in_order(
    hosted: &mut HostedDocument,
    patches: &[Patch],
) -> (usize, Option<grove_engine::Error>) {
    let root = hosted.document.root();
    let tree = hosted.document.tree_mut();
    for (applied, patch) in patches.iter().enumerate() {
        if let Err(e) = tree.apply_patch(root, patch) {
            return (applied, Some(e));
        }
    }
    (patches.len(), None)
}

/// Write the new snapshot and the logged patches in one transaction.
async fn persist(
    pool: &PgPool,
    doc_id: &str,
    snapshot: serde_json::Value,
    seq: i64,
    logged: &[LoggedPatch],
) -> Result<()> {
    let mut encoded = Vec::with_capacity(logged.len());
    for entry in logged {
        let value = serde_json::to_value(&entry.patch)
            .map_err(|e| AppError::Internal(format!("cannot encode patch: {}", e)))?;
        encoded.push((entry, value));
    }

    let mut tx = pool.begin().await?;
    db::save_document(&mut tx, doc_id, &snapshot, seq).await?;
    for (entry, value) in &encoded {
        db::insert_patch(&mut tx, doc_id, entry.seq, &entry.node_id, value).await?;
    }
    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_factory;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_in_order_stops_at_first_failure() {
        let registry = DocumentRegistry::new(default_factory());
        let shared = registry.host("doc-1", None).unwrap();
        let mut hosted = shared.lock().await;

        let (applied, failure) = apply_in_order(
            &mut hosted,
            &[
                Patch::add("/a", json!({"n": 1})),
                Patch::add("/missing/x", json!(1)),
                Patch::add("/b", json!({})),
            ],
        );

        assert_eq!(applied, 1);
        assert_eq!(
            failure,
            Some(grove_engine::Error::PathNotFound("/missing".into()))
        );
        assert_eq!(hosted.document.snapshot().unwrap(), json!({"a": {"n": 1}}));
        assert_eq!(hosted.drain("node-1").len(), 1);
    }

    #[test]
    fn test_push_request_deserialization() {
        let json = r#"{
            "nodeId": "device-123",
            "patches": [{"op": "replace", "path": "/todo/done", "value": true}]
        }"#;
        let request: PushRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.node_id, "device-123");
        assert_eq!(
            request.patches,
            vec![Patch::replace("/todo/done", json!(true))]
        );
    }
}
