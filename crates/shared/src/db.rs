//! Database pool construction, migrations, and the soft-delete convention

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Create the connection pool used for regular queries.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Create a pool for running migrations.
///
/// Migrations use a direct connection with longer timeouts; connection
/// poolers that don't support prepared statements break `sqlx migrate`.
pub async fn create_migration_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
}

/// Apply pending migrations from `crates/shared/migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Tables that use the `deleted_at` soft-delete convention.
///
/// Rows are never hard-deleted; every query over these tables must filter
/// `deleted_at IS NULL`. Funneling the delete through this enum keeps the
/// convention uniform instead of each service hand-rolling its own flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeletable {
    PricingPlans,
    PlatformConstants,
}

impl SoftDeletable {
    pub fn table_name(&self) -> &'static str {
        match self {
            SoftDeletable::PricingPlans => "pricing_plans",
            SoftDeletable::PlatformConstants => "platform_constants",
        }
    }
}

/// Soft-delete a row by id. Returns false when the row is absent or
/// already deleted.
pub async fn soft_delete(
    pool: &PgPool,
    table: SoftDeletable,
    id: Uuid,
) -> Result<bool, sqlx::Error> {
    // Table name comes from the enum above, never from caller input.
    let query = format!(
        "UPDATE {} SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        table.table_name()
    );

    let rows_affected = sqlx::query(&query).bind(id).execute(pool).await?.rows_affected();

    Ok(rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_deletable_table_names() {
        assert_eq!(SoftDeletable::PricingPlans.table_name(), "pricing_plans");
        assert_eq!(
            SoftDeletable::PlatformConstants.table_name(),
            "platform_constants"
        );
    }
}
