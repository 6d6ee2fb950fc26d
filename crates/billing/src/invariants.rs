//! Billing invariants
//!
//! Runnable consistency checks over the credit ledger and purchase flow,
//! exposed on the admin surface. Each invariant is a real SQL query that
//! only reads; violations carry enough context to debug the row.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single invariant violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - balances may be wrong
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceMismatchRow {
    user_id: Uuid,
    balance: i64,
    ledger_sum: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct UncreditedPurchaseRow {
    purchase_id: Uuid,
    user_id: Uuid,
    credits_included: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanEvidenceRow {
    attachment_id: Uuid,
    purchase_id: Uuid,
    user_id: Uuid,
    payment_method: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ApprovalGapRow {
    purchase_id: Uuid,
    user_id: Uuid,
    payment_status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingSubscriptionRow {
    purchase_id: Uuid,
    user_id: Uuid,
    bundle_type: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StuckWebhookRow {
    id: Uuid,
    gateway: String,
    event_reference: String,
    processing_started_at: OffsetDateTime,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_balance_matches_ledger().await?);
        violations.extend(self.check_completed_purchases_credited().await?);
        violations.extend(self.check_evidence_only_on_manual().await?);
        violations.extend(self.check_manual_settlement_has_approver().await?);
        violations.extend(self.check_subscription_purchases_have_period().await?);
        violations.extend(self.check_no_stuck_webhook_claims().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Balance equals the ledger sum
    ///
    /// Every mutation writes a `credit_transactions` row in the same
    /// transaction, so a drift means a write path bypassed the ledger.
    async fn check_balance_matches_ledger(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BalanceMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                uc.user_id,
                uc.balance,
                (SELECT SUM(ct.amount) FROM credit_transactions ct WHERE ct.user_id = uc.user_id) as ledger_sum
            FROM user_credits uc
            WHERE uc.balance != COALESCE(
                (SELECT SUM(ct.amount) FROM credit_transactions ct WHERE ct.user_id = uc.user_id), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "balance_matches_ledger".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Balance {} does not equal ledger sum {}",
                    row.balance,
                    row.ledger_sum.unwrap_or(0)
                ),
                context: serde_json::json!({
                    "balance": row.balance,
                    "ledger_sum": row.ledger_sum,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Completed purchases granted their credits
    ///
    /// A purchase must never read `completed` without the matching ledger
    /// transaction existing.
    async fn check_completed_purchases_credited(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UncreditedPurchaseRow> = sqlx::query_as(
            r#"
            SELECT p.id as purchase_id, p.user_id, p.credits_included
            FROM purchases p
            WHERE p.payment_status = 'completed'
              AND p.credits_included > 0
              AND NOT EXISTS (
                  SELECT 1 FROM credit_transactions ct
                  WHERE ct.purchase_id = p.id AND ct.kind = 'purchase'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_purchases_credited".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Completed purchase never credited {} credits",
                    row.credits_included
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "credits_included": row.credits_included,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Evidence attachments only on manual purchases
    async fn check_evidence_only_on_manual(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanEvidenceRow> = sqlx::query_as(
            r#"
            SELECT a.id as attachment_id, p.id as purchase_id, p.user_id, p.payment_method
            FROM attachments a
            JOIN purchases p ON p.id = a.record_id
            WHERE a.record_type = 'purchase'
              AND a.name = 'payment_evidence'
              AND p.payment_method != 'manual'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "evidence_only_on_manual".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Payment evidence attached to a '{}' purchase",
                    row.payment_method
                ),
                context: serde_json::json!({
                    "attachment_id": row.attachment_id,
                    "purchase_id": row.purchase_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Manually settled purchases record their approver
    async fn check_manual_settlement_has_approver(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ApprovalGapRow> = sqlx::query_as(
            r#"
            SELECT p.id as purchase_id, p.user_id, p.payment_status
            FROM purchases p
            WHERE p.payment_method = 'manual'
              AND p.payment_status IN ('completed', 'failed')
              AND p.approved_by IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "manual_settlement_has_approver".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Manual purchase reached '{}' without a recorded approver",
                    row.payment_status
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "payment_status": row.payment_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Completed subscription purchases opened a period
    async fn check_subscription_purchases_have_period(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT p.id as purchase_id, p.user_id, p.bundle_type
            FROM purchases p
            WHERE p.payment_status = 'completed'
              AND p.bundle_type IN ('subscription', 'hybrid')
              AND NOT EXISTS (
                  SELECT 1 FROM user_subscriptions us WHERE us.purchase_id = p.id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscription_purchases_have_period".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Completed '{}' purchase opened no subscription period",
                    row.bundle_type
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "bundle_type": row.bundle_type,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 6: No webhook claims stuck in processing
    ///
    /// A claim past the recovery timeout means a worker died mid-event and
    /// no redelivery has arrived to heal it.
    async fn check_no_stuck_webhook_claims(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StuckWebhookRow> = sqlx::query_as(
            r#"
            SELECT id, gateway, event_reference, processing_started_at
            FROM webhook_events
            WHERE processing_result = 'processing'
              AND processing_started_at < NOW() - INTERVAL '30 minutes'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stuck_webhook_claims".to_string(),
                user_ids: vec![],
                description: format!(
                    "Webhook event '{}' from {} stuck in processing since {}",
                    row.event_reference, row.gateway, row.processing_started_at
                ),
                context: serde_json::json!({
                    "claim_id": row.id,
                    "gateway": row.gateway,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "balance_matches_ledger" => self.check_balance_matches_ledger().await,
            "completed_purchases_credited" => self.check_completed_purchases_credited().await,
            "evidence_only_on_manual" => self.check_evidence_only_on_manual().await,
            "manual_settlement_has_approver" => self.check_manual_settlement_has_approver().await,
            "subscription_purchases_have_period" => {
                self.check_subscription_purchases_have_period().await
            }
            "no_stuck_webhook_claims" => self.check_no_stuck_webhook_claims().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "balance_matches_ledger",
            "completed_purchases_credited",
            "evidence_only_on_manual",
            "manual_settlement_has_approver",
            "subscription_purchases_have_period",
            "no_stuck_webhook_claims",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"balance_matches_ledger"));
        assert!(checks.contains(&"completed_purchases_credited"));
    }
}
