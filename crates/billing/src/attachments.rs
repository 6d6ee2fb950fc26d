//! Blob and attachment records
//!
//! A `Blob` is an opaque reference to an object in storage; an
//! `Attachment` joins a blob to an owning record under a semantic name
//! (`payment_evidence` on a purchase). Attachments are immutable once
//! created.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Semantic name used for purchase evidence attachments.
pub const PAYMENT_EVIDENCE: &str = "payment_evidence";

/// Record type string for attachments owned by a purchase.
pub const RECORD_PURCHASE: &str = "purchase";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Blob {
    pub id: Uuid,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub record_type: String,
    pub record_id: Uuid,
    pub name: String,
    pub blob_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Attachment joined with its blob, as listings need both.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttachmentWithBlob {
    pub id: Uuid,
    pub record_id: Uuid,
    pub name: String,
    pub blob_id: Uuid,
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
}

/// Insert a blob row inside a caller-owned transaction.
pub async fn create_blob_in_tx(
    conn: &mut PgConnection,
    storage_key: &str,
    filename: &str,
    content_type: &str,
    byte_size: i64,
) -> BillingResult<Blob> {
    let blob = sqlx::query_as::<_, Blob>(
        r#"
        INSERT INTO blobs (storage_key, filename, content_type, byte_size)
        VALUES ($1, $2, $3, $4)
        RETURNING id, storage_key, filename, content_type, byte_size, created_at
        "#,
    )
    .bind(storage_key)
    .bind(filename)
    .bind(content_type)
    .bind(byte_size)
    .fetch_one(&mut *conn)
    .await?;

    Ok(blob)
}

/// Join a blob to an owning record inside a caller-owned transaction.
pub async fn create_attachment_in_tx(
    conn: &mut PgConnection,
    record_type: &str,
    record_id: Uuid,
    name: &str,
    blob_id: Uuid,
) -> BillingResult<Attachment> {
    let attachment = sqlx::query_as::<_, Attachment>(
        r#"
        INSERT INTO attachments (record_type, record_id, name, blob_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, record_type, record_id, name, blob_id, created_at
        "#,
    )
    .bind(record_type)
    .bind(record_id)
    .bind(name)
    .bind(blob_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(attachment)
}

/// Evidence attachments for a set of purchases, joined with their blobs.
pub async fn evidence_for_purchases(
    pool: &PgPool,
    purchase_ids: &[Uuid],
) -> BillingResult<Vec<AttachmentWithBlob>> {
    if purchase_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, AttachmentWithBlob>(
        r#"
        SELECT a.id, a.record_id, a.name, a.blob_id,
               b.storage_key, b.filename, b.content_type, b.byte_size
        FROM attachments a
        JOIN blobs b ON b.id = a.blob_id
        WHERE a.record_type = $1 AND a.name = $2 AND a.record_id = ANY($3)
        ORDER BY a.created_at
        "#,
    )
    .bind(RECORD_PURCHASE)
    .bind(PAYMENT_EVIDENCE)
    .bind(purchase_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
