//! Database operations for the patch log.

use grove_engine::Patch;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// A stored patch row from the database.
#[derive(Debug)]
pub struct StoredPatch {
    pub seq: i64,
    pub node_id: String,
    pub patch: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredPatch {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredPatch {
            seq: row.try_get("seq")?,
            node_id: row.try_get("node_id")?,
            patch: row.try_get("patch")?,
        })
    }
}

impl StoredPatch {
    /// Decode the stored JSON back into an engine patch.
    pub fn to_patch(&self) -> Result<Patch, grove_engine::Error> {
        Patch::try_from(self.patch.clone())
    }
}

/// Append one patch to a document's log.
pub async fn insert_patch(
    tx: &mut Transaction<'_, Postgres>,
    doc_id: &str,
    seq: i64,
    node_id: &str,
    patch: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO patches (doc_id, seq, node_id, patch, created_at)
        VALUES ($1, $2, $3, $4, NOW())
        "#,
    )
    .bind(doc_id)
    .bind(seq)
    .bind(node_id)
    .bind(patch)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Get patches logged after `since`, oldest first.
pub async fn get_patches_since(
    pool: &PgPool,
    doc_id: &str,
    since: i64,
    limit: i64,
) -> Result<Vec<StoredPatch>, sqlx::Error> {
    sqlx::query_as::<_, StoredPatch>(
        r#"
        SELECT seq, node_id, patch
        FROM patches
        WHERE doc_id = $1 AND seq > $2
        ORDER BY seq ASC
        LIMIT $3
        "#,
    )
    .bind(doc_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}
