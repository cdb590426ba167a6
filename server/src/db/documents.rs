//! Database operations for the documents table.

use sqlx::{PgPool, Postgres, Row, Transaction};

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub snapshot: serde_json::Value,
    pub seq: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            snapshot: row.try_get("snapshot")?,
            seq: row.try_get("seq")?,
        })
    }
}

/// Load a document's latest snapshot and sequence number.
pub async fn load_document(
    pool: &PgPool,
    doc_id: &str,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT snapshot, seq
        FROM documents
        WHERE doc_id = $1
        "#,
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await
}

/// Insert or overwrite a document's snapshot.
pub async fn save_document(
    tx: &mut Transaction<'_, Postgres>,
    doc_id: &str,
    snapshot: &serde_json::Value,
    seq: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (doc_id, snapshot, seq, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (doc_id) DO UPDATE SET
            snapshot = EXCLUDED.snapshot,
            seq = EXCLUDED.seq,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(doc_id)
    .bind(snapshot)
    .bind(seq)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
