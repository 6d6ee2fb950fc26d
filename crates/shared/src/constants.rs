//! Platform constants store
//!
//! Key-value configuration table (feature toggles, prices, prompt text)
//! read by nearly every feature service and managed from the admin back
//! office. Values are stored as text; typed accessors parse on read.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

/// A single configuration entry.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ConstantEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Read/write access to `platform_constants`.
#[derive(Clone)]
pub struct ConstantsStore {
    pool: PgPool,
}

impl ConstantsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a value by key. Missing and soft-deleted keys read as None.
    pub async fn get(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM platform_constants WHERE key = $1 AND deleted_at IS NULL",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Typed accessor for numeric configuration values.
    ///
    /// A present-but-unparseable value falls back to the default, with a
    /// warning; a misconfigured constant must not take the feature down.
    pub async fn get_i64(&self, key: &str, default: i64) -> Result<i64, sqlx::Error> {
        match self.get(key).await? {
            Some(raw) => match raw.parse() {
                Ok(value) => Ok(value),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, "Constant is not a valid integer, using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> Result<bool, sqlx::Error> {
        match self.get(key).await? {
            Some(raw) => match raw.as_str() {
                "true" | "1" | "on" => Ok(true),
                "false" | "0" | "off" => Ok(false),
                other => {
                    tracing::warn!(key = %key, value = %other, "Constant is not a valid boolean, using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// Create or overwrite a key. Re-setting a soft-deleted key revives it.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: Option<Uuid>,
    ) -> Result<ConstantEntry, sqlx::Error> {
        let entry = sqlx::query_as::<_, ConstantEntry>(
            r#"
            INSERT INTO platform_constants (key, value, description, updated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                description = COALESCE(EXCLUDED.description, platform_constants.description),
                updated_by = EXCLUDED.updated_by,
                updated_at = NOW(),
                deleted_at = NULL
            RETURNING id, key, value, description, updated_by, updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(updated_by)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(key = %key, updated_by = ?updated_by, "Platform constant updated");

        Ok(entry)
    }

    pub async fn list(&self) -> Result<Vec<ConstantEntry>, sqlx::Error> {
        sqlx::query_as::<_, ConstantEntry>(
            r#"
            SELECT id, key, value, description, updated_by, updated_at
            FROM platform_constants
            WHERE deleted_at IS NULL
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }
}
