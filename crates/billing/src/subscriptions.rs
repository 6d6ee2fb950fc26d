//! Subscription period management
//!
//! A completed subscription or hybrid purchase opens a period of
//! `duration_days`. Completing another while one is active stacks the new
//! period onto the current expiry rather than starting from now.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionPeriod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purchase_id: Uuid,
    pub plan_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Service over `user_subscriptions`.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The period covering now, if any.
    pub async fn active_for_user(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionPeriod>> {
        let period = sqlx::query_as::<_, SubscriptionPeriod>(
            r#"
            SELECT id, user_id, purchase_id, plan_id, starts_at, expires_at
            FROM user_subscriptions
            WHERE user_id = $1 AND starts_at <= NOW() AND expires_at > NOW()
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(period)
    }

    /// All periods for a user, newest first.
    pub async fn history(&self, user_id: Uuid) -> BillingResult<Vec<SubscriptionPeriod>> {
        let periods = sqlx::query_as::<_, SubscriptionPeriod>(
            r#"
            SELECT id, user_id, purchase_id, plan_id, starts_at, expires_at
            FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY starts_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(periods)
    }
}

/// Compute the window for a new period given the latest existing expiry.
/// Extension stacks onto an unexpired period.
pub(crate) fn next_period(
    now: OffsetDateTime,
    current_expiry: Option<OffsetDateTime>,
    duration_days: i32,
) -> (OffsetDateTime, OffsetDateTime) {
    let starts_at = match current_expiry {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    (starts_at, starts_at + Duration::days(duration_days as i64))
}

/// Open or extend a subscription inside the settlement transaction.
///
/// The latest expiry is read under lock so two settlements for the same
/// user serialize instead of both stacking from the same base.
pub async fn open_or_extend_in_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    purchase_id: Uuid,
    plan_id: Uuid,
    duration_days: i32,
) -> BillingResult<SubscriptionPeriod> {
    let latest: Option<(OffsetDateTime,)> = sqlx::query_as(
        r#"
        SELECT expires_at
        FROM user_subscriptions
        WHERE user_id = $1
        ORDER BY expires_at DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    let now = OffsetDateTime::now_utc();
    let (starts_at, expires_at) = next_period(now, latest.map(|(e,)| e), duration_days);

    let period = sqlx::query_as::<_, SubscriptionPeriod>(
        r#"
        INSERT INTO user_subscriptions (user_id, purchase_id, plan_id, starts_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, user_id, purchase_id, plan_id, starts_at, expires_at
        "#,
    )
    .bind(user_id)
    .bind(purchase_id)
    .bind(plan_id)
    .bind(starts_at)
    .bind(expires_at)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        user_id = %user_id,
        purchase_id = %purchase_id,
        expires_at = %expires_at,
        "Subscription period opened"
    );

    Ok(period)
}
