//! In-memory registry of hosted documents.
//!
//! A document is loaded from its stored snapshot on first use and stays
//! resident while requests or connections use it. Mutations go through the
//! document's mutex so the patch log sequence stays gapless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use grove_engine::{Document, Factory, Patch};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::StoredDocument;
use crate::error::Result;

/// A patch together with its position in a document's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedPatch {
    pub seq: i64,
    pub node_id: String,
    pub patch: Patch,
}

/// A resident document and the sequence number of its last logged patch.
#[derive(Debug)]
pub struct HostedDocument {
    pub document: Document,
    pub seq: i64,
    pub updated_at: DateTime<Utc>,
    /// Set when this copy ran ahead of storage and was evicted. Whoever
    /// locks a retired copy must reopen the document instead.
    pub retired: bool,
}

impl HostedDocument {
    /// Number the patches drained from the document's outbox.
    ///
    /// Advances `seq` past them; callers persist the result before releasing
    /// the lock.
    pub fn drain(&mut self, node_id: &str) -> Vec<LoggedPatch> {
        let patches = self.document.take_patches();
        let mut logged = Vec::with_capacity(patches.len());
        for patch in patches {
            self.seq += 1;
            logged.push(LoggedPatch {
                seq: self.seq,
                node_id: node_id.to_string(),
                patch,
            });
        }
        if !logged.is_empty() {
            self.updated_at = Utc::now();
        }
        logged
    }
}

pub type SharedDocument = Arc<Mutex<HostedDocument>>;

/// All documents currently resident in this server.
#[derive(Debug)]
pub struct DocumentRegistry {
    factory: Factory,
    documents: DashMap<String, SharedDocument>,
}

impl DocumentRegistry {
    pub fn new(factory: Factory) -> Self {
        Self {
            factory,
            documents: DashMap::new(),
        }
    }

    pub fn new_shared(factory: Factory) -> Arc<Self> {
        Arc::new(Self::new(factory))
    }

    pub fn get(&self, doc_id: &str) -> Option<SharedDocument> {
        self.documents.get(doc_id).map(|entry| entry.value().clone())
    }

    /// Make `doc_id` resident, restoring it from `stored` if given.
    ///
    /// If another request hosted the document first, that instance wins and
    /// `stored` is ignored.
    pub fn host(&self, doc_id: &str, stored: Option<StoredDocument>) -> Result<SharedDocument> {
        match self.documents.entry(doc_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (document, seq) = match stored {
                    Some(stored) => (
                        Document::new(&self.factory, Some(&stored.snapshot))?,
                        stored.seq,
                    ),
                    None => (Document::new(&self.factory, None)?, 0),
                };
                tracing::info!(doc_id = %doc_id, seq, "Hosting document");

                let shared = Arc::new(Mutex::new(HostedDocument {
                    document,
                    seq,
                    updated_at: Utc::now(),
                    retired: false,
                }));
                entry.insert(shared.clone());
                Ok(shared)
            }
        }
    }

    /// Retire `shared` and drop it from the registry.
    ///
    /// Takes the caller's guard so nobody waiting on the mutex can act on
    /// the copy before it is marked. A different instance hosted under the
    /// same ID is left alone. The stored copy is untouched.
    pub fn retire(
        &self,
        doc_id: &str,
        shared: &SharedDocument,
        hosted: &mut HostedDocument,
    ) -> bool {
        hosted.retired = true;
        let removed = self
            .documents
            .remove_if(doc_id, |_, resident| Arc::ptr_eq(resident, shared))
            .is_some();
        tracing::warn!(doc_id = %doc_id, seq = hosted.seq, removed, "Retired document");
        removed
    }

    /// Drop `doc_id` if nothing but the registry holds it.
    ///
    /// Every change is persisted before its lock is released, so an idle
    /// copy can always be reloaded from storage.
    pub fn release_if_idle(&self, doc_id: &str) -> bool {
        let released = self
            .documents
            .remove_if(doc_id, |_, resident| Arc::strong_count(resident) == 1)
            .is_some();
        if released {
            tracing::debug!(doc_id = %doc_id, "Released idle document");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}
