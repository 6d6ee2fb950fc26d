//! Purchase state machine
//!
//! Tracks a purchase attempt from initiation to terminal resolution.
//! `pending -> waiting_approval -> completed | failed` for the manual
//! flow, `pending -> completed | failed` directly for gateway settlement.
//! Terminal states are immutable: every transition into one is a
//! conditional UPDATE over the non-terminal statuses, so at most one
//! settlement wins no matter how many admins or webhook deliveries race.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use studimed_shared::{ActorType, BundleType, PaymentMethod, PaymentStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::attachments::{self, PAYMENT_EVIDENCE, RECORD_PURCHASE};
use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventLogger, BillingEventType};
use crate::gateways::SettlementAction;
use crate::ledger::{self, EntryKind};
use crate::storage::BlobStorage;
use crate::subscriptions;

/// Evidence images larger than this are rejected before upload.
pub const MAX_EVIDENCE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub amount: i64,
    pub credits_included: i64,
    pub bundle_type: String,
    pub duration_days: Option<i32>,
    pub payment_method: String,
    pub payment_status: String,
    pub gateway_reference: Option<String>,
    pub approved_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub approved_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Purchase {
    pub fn status(&self) -> BillingResult<PaymentStatus> {
        Ok(PaymentStatus::from_str(&self.payment_status)?)
    }

    pub fn method(&self) -> BillingResult<PaymentMethod> {
        Ok(PaymentMethod::from_str(&self.payment_method)?)
    }
}

/// Admin verdict on a manually paid purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    Completed,
    Failed,
}

impl ApprovalVerdict {
    fn as_status(&self) -> PaymentStatus {
        match self {
            ApprovalVerdict::Completed => PaymentStatus::Completed,
            ApprovalVerdict::Failed => PaymentStatus::Failed,
        }
    }
}

/// Result of applying a gateway notification to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The purchase transitioned to the given terminal status.
    Applied(PaymentStatus),
    /// The purchase was already terminal; nothing changed.
    AlreadySettled,
    /// No purchase carries this order reference. Gateways send test
    /// notifications with made-up order ids; these are acknowledged and
    /// dropped.
    UnknownOrder,
    /// The notification reported an in-flight status; nothing to do.
    Ignored,
}

/// Uploaded evidence image, already read out of the multipart stream.
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Evidence reference returned to the uploader and shown to admins.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReceipt {
    pub attachment_id: Uuid,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseWithEvidence {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub evidence: Option<EvidenceReceipt>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasePage {
    pub purchases: Vec<PurchaseWithEvidence>,
    pub has_more: bool,
}

const PURCHASE_COLUMNS: &str = "id, user_id, plan_id, plan_name, amount, credits_included, \
     bundle_type, duration_days, payment_method, payment_status, gateway_reference, \
     approved_by, approved_at, created_at, updated_at";

/// Reject evidence uploads that are not images, empty, or oversized.
pub(crate) fn validate_evidence(upload: &EvidenceUpload) -> BillingResult<()> {
    if !upload.content_type.starts_with("image/") {
        return Err(BillingError::Validation("evidence must be an image".into()));
    }
    if upload.bytes.is_empty() {
        return Err(BillingError::Validation("evidence file is empty".into()));
    }
    if upload.bytes.len() > MAX_EVIDENCE_BYTES {
        return Err(BillingError::Validation(format!(
            "evidence exceeds the {} MB limit",
            MAX_EVIDENCE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Service over `purchases` and the settlement flow.
#[derive(Clone)]
pub struct PurchaseService {
    pool: PgPool,
    storage: BlobStorage,
    events: BillingEventLogger,
}

impl PurchaseService {
    pub fn new(pool: PgPool, storage: BlobStorage) -> Self {
        let events = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            storage,
            events,
        }
    }

    /// Initiate a purchase of an active plan. Gateway methods get an order
    /// reference the webhook will later look up; manual purchases don't.
    pub async fn create_purchase(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        method: PaymentMethod,
    ) -> BillingResult<Purchase> {
        let plan = sqlx::query_as::<_, crate::plans::PricingPlan>(
            r#"
            SELECT id, name, code, description, price, bundle_type, duration_days,
                   credits_included, is_active, is_popular, discount_percent, display_order,
                   payment_methods, created_at, updated_at
            FROM pricing_plans
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::NotFound("pricing plan"))?;

        if !plan.is_active {
            return Err(BillingError::Validation(
                "plan is not available for purchase".into(),
            ));
        }
        if !plan.allows_method(method) {
            return Err(BillingError::Validation(format!(
                "payment method '{}' is not allowed for this plan",
                method
            )));
        }

        let gateway_reference = method
            .is_gateway()
            .then(|| format!("SM-{}", Uuid::new_v4().simple()));

        let purchase = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            INSERT INTO purchases
                (user_id, plan_id, plan_name, amount, credits_included, bundle_type,
                 duration_days, payment_method, gateway_reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(plan.id)
        .bind(&plan.name)
        .bind(plan.discounted_price())
        .bind(plan.credits_included)
        .bind(&plan.bundle_type)
        .bind(plan.duration_days)
        .bind(method.as_str())
        .bind(&gateway_reference)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            purchase_id = %purchase.id,
            plan = %plan.name,
            method = %method,
            "Purchase created"
        );

        self.events
            .log(
                BillingEvent::new(BillingEventType::PurchaseCreated, ActorType::User)
                    .actor(user_id)
                    .user(user_id)
                    .purchase(purchase.id)
                    .detail(serde_json::json!({
                        "plan": &plan.name,
                        "amount": purchase.amount,
                        "method": method.as_str(),
                    })),
            )
            .await;

        Ok(purchase)
    }

    /// Attach payment evidence to a manual purchase and move it to
    /// `waiting_approval`.
    ///
    /// The image is uploaded to the blob store before the database
    /// transaction; an orphaned object on a lost race is harmless, a blob
    /// row without an object is not.
    pub async fn attach_evidence(
        &self,
        user_id: Uuid,
        purchase_id: Uuid,
        upload: EvidenceUpload,
    ) -> BillingResult<EvidenceReceipt> {
        let purchase = self.get_owned(user_id, purchase_id).await?;

        if purchase.method()? != PaymentMethod::Manual {
            return Err(BillingError::InvalidState(
                "evidence can only be attached to manual purchases".into(),
            ));
        }
        if purchase.status()? != PaymentStatus::Pending {
            return Err(BillingError::InvalidState(format!(
                "evidence can only be attached while pending, purchase is {}",
                purchase.payment_status
            )));
        }
        validate_evidence(&upload)?;

        let storage_key = self.storage.generate_key(PAYMENT_EVIDENCE);
        let byte_size = upload.bytes.len() as i64;
        self.storage
            .put_object(&storage_key, &upload.content_type, upload.bytes)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Re-checked under the transaction: a concurrent upload or admin
        // verdict between the read above and here loses exactly one race.
        let transitioned = sqlx::query(
            r#"
            UPDATE purchases
            SET payment_status = 'waiting_approval', updated_at = NOW()
            WHERE id = $1 AND payment_method = 'manual' AND payment_status = 'pending'
            "#,
        )
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if transitioned == 0 {
            return Err(BillingError::InvalidState(
                "purchase is no longer awaiting evidence".into(),
            ));
        }

        let blob = attachments::create_blob_in_tx(
            &mut tx,
            &storage_key,
            &upload.filename,
            &upload.content_type,
            byte_size,
        )
        .await?;
        let attachment = attachments::create_attachment_in_tx(
            &mut tx,
            RECORD_PURCHASE,
            purchase_id,
            PAYMENT_EVIDENCE,
            blob.id,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            purchase_id = %purchase_id,
            attachment_id = %attachment.id,
            "Payment evidence attached, purchase awaiting approval"
        );

        self.events
            .log(
                BillingEvent::new(BillingEventType::EvidenceAttached, ActorType::User)
                    .actor(user_id)
                    .user(user_id)
                    .purchase(purchase_id)
                    .detail(serde_json::json!({"filename": &blob.filename})),
            )
            .await;

        Ok(EvidenceReceipt {
            attachment_id: attachment.id,
            filename: blob.filename,
            url: self.storage.presign_get(&storage_key)?,
        })
    }

    /// Admin verdict on a manual purchase. On `completed` the ledger
    /// credit and any subscription period are applied atomically with the
    /// status flip.
    pub async fn approve_purchase(
        &self,
        admin_id: Uuid,
        purchase_id: Uuid,
        verdict: ApprovalVerdict,
    ) -> BillingResult<Purchase> {
        let purchase = self.get(purchase_id).await?;

        if purchase.method()? != PaymentMethod::Manual {
            return Err(BillingError::InvalidState(
                "only manual purchases are settled by admin approval".into(),
            ));
        }
        if purchase.status()?.is_terminal() {
            return Err(BillingError::InvalidState(format!(
                "purchase is already {}",
                purchase.payment_status
            )));
        }

        let settled = self
            .settle(purchase_id, verdict.as_status(), Some(admin_id))
            .await?
            .ok_or_else(|| {
                // Lost a race with another admin between the read and the
                // conditional update.
                BillingError::InvalidState("purchase was settled concurrently".into())
            })?;

        self.log_settlement(&settled, ActorType::Admin, Some(admin_id)).await;

        Ok(settled)
    }

    /// Apply a verified gateway notification. Idempotent: replays and
    /// concurrent deliveries collapse onto `AlreadySettled`.
    pub async fn finalize_from_gateway(
        &self,
        order_reference: &str,
        action: SettlementAction,
    ) -> BillingResult<GatewayOutcome> {
        let verdict = match action {
            SettlementAction::Complete => PaymentStatus::Completed,
            SettlementAction::Fail => PaymentStatus::Failed,
            SettlementAction::Ignore => return Ok(GatewayOutcome::Ignored),
        };

        let purchase = sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE gateway_reference = $1"
        ))
        .bind(order_reference)
        .fetch_optional(&self.pool)
        .await?;

        let Some(purchase) = purchase else {
            tracing::warn!(order_reference = %order_reference, "Notification for unknown order");
            return Ok(GatewayOutcome::UnknownOrder);
        };

        if purchase.status()?.is_terminal() {
            return Ok(GatewayOutcome::AlreadySettled);
        }

        match self.settle(purchase.id, verdict, None).await? {
            Some(settled) => {
                self.log_settlement(&settled, ActorType::Gateway, None).await;
                Ok(GatewayOutcome::Applied(verdict))
            }
            // Another delivery won the conditional update.
            None => Ok(GatewayOutcome::AlreadySettled),
        }
    }

    /// The settlement core shared by admin approval and gateway webhooks.
    ///
    /// One transaction: conditional status flip over the non-terminal
    /// states, then the ledger credit and subscription period for
    /// `completed`. Returns None when the conditional update matched no
    /// row, i.e. a concurrent settlement already won.
    async fn settle(
        &self,
        purchase_id: Uuid,
        verdict: PaymentStatus,
        approved_by: Option<Uuid>,
    ) -> BillingResult<Option<Purchase>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            UPDATE purchases
            SET payment_status = $2,
                approved_by = COALESCE($3, approved_by),
                approved_at = CASE WHEN $3 IS NULL THEN approved_at ELSE NOW() END,
                updated_at = NOW()
            WHERE id = $1 AND payment_status IN ('pending', 'waiting_approval')
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(purchase_id)
        .bind(verdict.as_str())
        .bind(approved_by)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(purchase) = updated else {
            return Ok(None);
        };

        if verdict == PaymentStatus::Completed {
            if purchase.credits_included > 0 {
                ledger::credit_in_tx(
                    &mut tx,
                    purchase.user_id,
                    purchase.credits_included,
                    EntryKind::Purchase,
                    &format!("Purchase of {}", purchase.plan_name),
                    Some(purchase.id),
                )
                .await?;
            }

            let bundle = BundleType::from_str(&purchase.bundle_type)?;
            if bundle.grants_subscription() {
                match purchase.duration_days.filter(|d| *d > 0) {
                    Some(days) => {
                        subscriptions::open_or_extend_in_tx(
                            &mut tx,
                            purchase.user_id,
                            purchase.id,
                            purchase.plan_id,
                            days,
                        )
                        .await?;
                    }
                    None => {
                        // Snapshot constraint should make this unreachable.
                        tracing::error!(
                            purchase_id = %purchase.id,
                            bundle = %purchase.bundle_type,
                            "Subscription purchase has no duration, skipping period"
                        );
                    }
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            purchase_id = %purchase.id,
            user_id = %purchase.user_id,
            status = %purchase.payment_status,
            approved_by = ?approved_by,
            "Purchase settled"
        );

        Ok(Some(purchase))
    }

    async fn log_settlement(
        &self,
        purchase: &Purchase,
        actor_type: ActorType,
        actor_id: Option<Uuid>,
    ) {
        let event_type = if purchase.payment_status == PaymentStatus::Completed.as_str() {
            BillingEventType::PurchaseCompleted
        } else {
            BillingEventType::PurchaseFailed
        };

        let mut event = BillingEvent::new(event_type, actor_type)
            .user(purchase.user_id)
            .purchase(purchase.id)
            .detail(serde_json::json!({
                "plan": &purchase.plan_name,
                "credits": purchase.credits_included,
            }));
        if let Some(actor_id) = actor_id {
            event = event.actor(actor_id);
        }

        self.events.log(event).await;
    }

    pub async fn get(&self, purchase_id: Uuid) -> BillingResult<Purchase> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1"
        ))
        .bind(purchase_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::NotFound("purchase"))
    }

    /// Fetch a purchase only if the caller owns it. Absent and not-owned
    /// are indistinguishable to the caller.
    async fn get_owned(&self, user_id: Uuid, purchase_id: Uuid) -> BillingResult<Purchase> {
        sqlx::query_as::<_, Purchase>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = $1 AND user_id = $2"
        ))
        .bind(purchase_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::NotFound("purchase"))
    }

    /// A user's purchase history, newest first, with evidence URLs
    /// regenerated per request.
    pub async fn history(
        &self,
        user_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> BillingResult<PurchasePage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page - 1) * per_page;

        // Over-fetch by one to learn whether another page exists.
        let mut purchases = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            SELECT {PURCHASE_COLUMNS}
            FROM purchases
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(per_page + 1)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let has_more = purchases.len() as i64 > per_page;
        purchases.truncate(per_page as usize);

        let purchases = self.with_evidence(purchases).await?;

        Ok(PurchasePage {
            purchases,
            has_more,
        })
    }

    /// Manual purchases awaiting an admin verdict, oldest first.
    pub async fn pending_approvals(&self) -> BillingResult<Vec<PurchaseWithEvidence>> {
        let purchases = sqlx::query_as::<_, Purchase>(&format!(
            r#"
            SELECT {PURCHASE_COLUMNS}
            FROM purchases
            WHERE payment_status = 'waiting_approval'
            ORDER BY created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        self.with_evidence(purchases).await
    }

    async fn with_evidence(
        &self,
        purchases: Vec<Purchase>,
    ) -> BillingResult<Vec<PurchaseWithEvidence>> {
        let ids: Vec<Uuid> = purchases.iter().map(|p| p.id).collect();
        let evidence = attachments::evidence_for_purchases(&self.pool, &ids).await?;

        purchases
            .into_iter()
            .map(|purchase| {
                let receipt = evidence
                    .iter()
                    .find(|a| a.record_id == purchase.id)
                    .map(|a| {
                        Ok::<_, BillingError>(EvidenceReceipt {
                            attachment_id: a.id,
                            filename: a.filename.clone(),
                            url: self.storage.presign_get(&a.storage_key)?,
                        })
                    })
                    .transpose()?;

                Ok(PurchaseWithEvidence {
                    purchase,
                    evidence: receipt,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_maps_to_terminal_status() {
        assert_eq!(
            ApprovalVerdict::Completed.as_status(),
            PaymentStatus::Completed
        );
        assert_eq!(ApprovalVerdict::Failed.as_status(), PaymentStatus::Failed);
        assert!(ApprovalVerdict::Completed.as_status().is_terminal());
        assert!(ApprovalVerdict::Failed.as_status().is_terminal());
    }

    #[test]
    fn test_verdict_deserializes_from_request_body() {
        let verdict: ApprovalVerdict = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(verdict, ApprovalVerdict::Completed);
        let verdict: ApprovalVerdict = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(verdict, ApprovalVerdict::Failed);
        assert!(serde_json::from_str::<ApprovalVerdict>("\"refunded\"").is_err());
    }
}
