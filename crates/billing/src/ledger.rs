//! Credit ledger
//!
//! Single source of truth for a user's spendable balance. Every mutation
//! is a read-modify-write under a row lock, and every mutation appends a
//! `credit_transactions` audit row with the resulting balance, inside the
//! same transaction.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Credits granted by a completed purchase.
    Purchase,
    /// Bonus credits granted from the admin back office.
    AdminGrant,
    /// Feature usage debit.
    Usage,
    /// Manual correction.
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Purchase => "purchase",
            EntryKind::AdminGrant => "admin_grant",
            EntryKind::Usage => "usage",
            EntryKind::Adjustment => "adjustment",
        }
    }
}

/// One row of the ledger audit trail.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: String,
    pub description: String,
    pub purchase_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Page of ledger entries. `has_more` comes from fetching one row past the
/// page size.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub has_more: bool,
}

/// Service over `user_credits` and `credit_transactions`.
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance. Users without a ledger row read as zero; the row
    /// is created on first access so later locked reads always find it.
    pub async fn get_balance(&self, user_id: Uuid) -> BillingResult<i64> {
        sqlx::query("INSERT INTO user_credits (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let (balance,): (i64,) =
            sqlx::query_as("SELECT balance FROM user_credits WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(balance)
    }

    /// Grant credits. Amount must be positive. Returns the new balance.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        kind: EntryKind,
        description: &str,
        purchase_id: Option<Uuid>,
    ) -> BillingResult<i64> {
        let mut tx = self.pool.begin().await?;
        let balance =
            credit_in_tx(&mut tx, user_id, amount, kind, description, purchase_id).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            balance = balance,
            kind = kind.as_str(),
            "Credited ledger"
        );

        Ok(balance)
    }

    /// Spend credits. Amount must be positive. Fails without mutating when
    /// the balance would go negative. Returns the new balance.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        description: &str,
    ) -> BillingResult<i64> {
        let mut tx = self.pool.begin().await?;
        let balance = debit_in_tx(&mut tx, user_id, amount, description).await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            balance = balance,
            "Debited ledger"
        );

        Ok(balance)
    }

    /// Ledger history for a user, newest first.
    pub async fn transactions(
        &self,
        user_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> BillingResult<LedgerPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page - 1) * per_page;

        // Over-fetch by one to learn whether another page exists.
        let mut entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, user_id, amount, balance_after, kind, description, purchase_id, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(per_page + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let has_more = entries.len() as i64 > per_page;
        entries.truncate(per_page as usize);

        Ok(LedgerPage { entries, has_more })
    }
}

/// Lock the ledger row, returning the current balance. Creates the row at
/// zero when absent so registration order never matters.
async fn lock_balance(conn: &mut PgConnection, user_id: Uuid) -> BillingResult<i64> {
    sqlx::query("INSERT INTO user_credits (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let (balance,): (i64,) =
        sqlx::query_as("SELECT balance FROM user_credits WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(balance)
}

async fn write_entry(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    balance_after: i64,
    kind: EntryKind,
    description: &str,
    purchase_id: Option<Uuid>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE user_credits SET balance = $2, updated_at = NOW() WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(balance_after)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (user_id, amount, balance_after, kind, description, purchase_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(balance_after)
    .bind(kind.as_str())
    .bind(description)
    .bind(purchase_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Credit inside a caller-owned transaction. Purchase settlement uses this
/// so the status flip and the grant commit or roll back together.
pub async fn credit_in_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    kind: EntryKind,
    description: &str,
    purchase_id: Option<Uuid>,
) -> BillingResult<i64> {
    if amount <= 0 {
        return Err(BillingError::Validation(format!(
            "credit amount must be positive, got {}",
            amount
        )));
    }

    let balance = lock_balance(conn, user_id).await?;
    let new_balance = balance + amount;
    write_entry(conn, user_id, amount, new_balance, kind, description, purchase_id).await?;

    Ok(new_balance)
}

/// Debit inside a caller-owned transaction.
pub async fn debit_in_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: i64,
    description: &str,
) -> BillingResult<i64> {
    if amount <= 0 {
        return Err(BillingError::Validation(format!(
            "debit amount must be positive, got {}",
            amount
        )));
    }

    let balance = lock_balance(conn, user_id).await?;
    if balance < amount {
        return Err(BillingError::InsufficientBalance {
            balance,
            requested: amount,
        });
    }

    let new_balance = balance - amount;
    write_entry(
        conn,
        user_id,
        -amount,
        new_balance,
        EntryKind::Usage,
        description,
        None,
    )
    .await?;

    Ok(new_balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_strings() {
        assert_eq!(EntryKind::Purchase.as_str(), "purchase");
        assert_eq!(EntryKind::AdminGrant.as_str(), "admin_grant");
        assert_eq!(EntryKind::Usage.as_str(), "usage");
        assert_eq!(EntryKind::Adjustment.as_str(), "adjustment");
    }
}
