//! Request handlers shared by the HTTP routes and the WebSocket loop.

mod pull;
mod push;
mod websocket;

pub use pull::*;
pub use push::*;
pub use websocket::*;

use sqlx::PgPool;
use tokio::sync::OwnedMutexGuard;

use crate::db;
use crate::documents::{DocumentRegistry, HostedDocument, SharedDocument};
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;

/// Longest accepted document ID.
const MAX_DOC_ID_LEN: usize = 128;

pub fn validate_doc_id(doc_id: &str) -> Result<()> {
    if doc_id.is_empty() || doc_id.len() > MAX_DOC_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "document id must be 1 to {} bytes",
            MAX_DOC_ID_LEN
        )));
    }
    if doc_id.chars().any(char::is_control) {
        return Err(AppError::BadRequest(
            "document id contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Get a resident document, loading it from storage on first use.
///
/// With `create` set, a document that was never stored starts empty;
/// otherwise it is reported as not found.
pub async fn open_document(
    pool: &PgPool,
    registry: &DocumentRegistry,
    doc_id: &str,
    create: bool,
) -> Result<SharedDocument> {
    validate_doc_id(doc_id)?;

    if let Some(shared) = registry.get(doc_id) {
        return Ok(shared);
    }

    let stored = db::load_document(pool, doc_id).await?;
    if stored.is_none() && !create {
        return Err(AppError::NotFound(format!("document '{}'", doc_id)));
    }
    registry.host(doc_id, stored)
}

/// Open `doc_id` and lock it.
///
/// A copy retired while this request waited for its lock is skipped and
/// the document is opened again.
pub async fn lock_document(
    pool: &PgPool,
    registry: &DocumentRegistry,
    doc_id: &str,
    create: bool,
) -> Result<(SharedDocument, OwnedMutexGuard<HostedDocument>)> {
    loop {
        let shared = open_document(pool, registry, doc_id, create).await?;
        let hosted = shared.clone().lock_owned().await;
        if !hosted.retired {
            return Ok((shared, hosted));
        }
        tracing::debug!(doc_id = %doc_id, "Reopening retired document");
    }
}

/// Let the registry drop `doc_id` once no connection is attached to it.
pub fn release_if_unwatched(
    registry: &DocumentRegistry,
    conn_manager: &ConnectionManager,
    doc_id: &str,
) {
    if !conn_manager.has_connections(doc_id) {
        registry.release_if_idle(doc_id);
    }
}
