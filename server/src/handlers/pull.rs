//! Pull handlers - serve document state and the patch log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{lock_document, release_if_unwatched};
use crate::db;
use crate::documents::{DocumentRegistry, LoggedPatch};
use crate::error::Result;
use crate::websocket::ConnectionManager;

/// Current state of a document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub doc_id: String,
    pub snapshot: serde_json::Value,
    /// Sequence number of the last patch folded into `snapshot`
    pub seq: i64,
    pub updated_at: DateTime<Utc>,
}

/// Query parameters for pulling the patch log.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    /// Last sequence number the client has applied
    pub since: Option<i64>,
    /// Maximum number of patches to return
    pub limit: Option<i64>,
}

/// Response for pulling the patch log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub patches: Vec<LoggedPatch>,
    /// Sequence number to pass as `since` on the next pull
    pub seq: i64,
    pub has_more: bool,
}

/// Default limit for pull requests.
const DEFAULT_LIMIT: i64 = 100;

/// Maximum limit for pull requests.
const MAX_LIMIT: i64 = 1000;

/// Return a document's snapshot and sequence number.
pub async fn handle_get_document(
    pool: &PgPool,
    registry: &DocumentRegistry,
    conn_manager: &ConnectionManager,
    doc_id: &str,
) -> Result<DocumentResponse> {
    let (shared, hosted) = lock_document(pool, registry, doc_id, false).await?;
    let response = DocumentResponse {
        doc_id: doc_id.to_string(),
        snapshot: hosted.document.snapshot()?,
        seq: hosted.seq,
        updated_at: hosted.updated_at,
    };
    drop(hosted);
    drop(shared);

    release_if_unwatched(registry, conn_manager, doc_id);
    Ok(response)
}

/// Return logged patches after `query.since`.
pub async fn handle_pull(pool: &PgPool, doc_id: &str, query: PullQuery) -> Result<PullResponse> {
    super::validate_doc_id(doc_id)?;

    let since = query.since.unwrap_or(0).max(0);
    let limit = query
        .limit
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT);

    // Fetch one more than requested to check if there are more
    let stored = db::get_patches_since(pool, doc_id, since, limit + 1).await?;

    let has_more = stored.len() as i64 > limit;
    let page: Vec<_> = stored.into_iter().take(limit as usize).collect();
    let seq = page.last().map(|p| p.seq).unwrap_or(since);

    let mut patches = Vec::with_capacity(page.len());
    for row in &page {
        match row.to_patch() {
            Ok(patch) => patches.push(LoggedPatch {
                seq: row.seq,
                node_id: row.node_id.clone(),
                patch,
            }),
            Err(e) => {
                tracing::warn!(
                    doc_id = %doc_id,
                    seq = row.seq,
                    "Skipping undecodable patch: {}",
                    e
                );
            }
        }
    }

    Ok(PullResponse {
        patches,
        seq,
        has_more,
    })
}
