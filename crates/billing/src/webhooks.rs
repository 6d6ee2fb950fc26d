//! Gateway webhook handling
//!
//! Applies verified Midtrans/Xendit notifications to the purchase state
//! machine. Two layers make replayed and concurrently delivered
//! notifications safe:
//!
//! 1. An atomic claim on `webhook_events` (INSERT .. ON CONFLICT ..
//!    RETURNING) grants exclusive processing rights per gateway event
//!    reference, with timeout recovery for claims stuck in `processing`.
//! 2. The settlement itself is a conditional update over non-terminal
//!    statuses, so even a duplicate that slipped past the claim cannot
//!    credit twice.
//!
//! Processing is synchronous: a failure after verification returns an
//! error (non-200) so the gateway redelivers, and the failed claim is
//! marked reclaimable.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateways::{MidtransNotification, XenditInvoiceCallback, XenditVaCallback};
use crate::purchases::{GatewayOutcome, PurchaseService};

/// Claims stuck in `processing` longer than this can be re-claimed.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Outcome reported to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The purchase transitioned; state was mutated.
    Processed,
    /// This event reference was already handled (replay or concurrent
    /// delivery).
    AlreadyProcessed,
    /// Verified but nothing to do: in-flight status, or unknown order.
    Ignored,
}

/// Handler for verified gateway notifications.
#[derive(Clone)]
pub struct WebhookHandler {
    pool: PgPool,
    purchases: PurchaseService,
}

impl WebhookHandler {
    pub fn new(pool: PgPool, purchases: PurchaseService) -> Self {
        Self { pool, purchases }
    }

    pub async fn handle_midtrans(
        &self,
        notification: MidtransNotification,
    ) -> BillingResult<WebhookOutcome> {
        let payload = serde_json::json!({
            "order_id": &notification.order_id,
            "transaction_status": &notification.transaction_status,
            "status_code": &notification.status_code,
            "gross_amount": &notification.gross_amount,
            "payment_type": &notification.payment_type,
        });

        self.process(
            "midtrans",
            &notification.event_reference(),
            payload,
            &notification.order_id,
            notification.settlement_action(),
        )
        .await
    }

    pub async fn handle_xendit_invoice(
        &self,
        callback: XenditInvoiceCallback,
    ) -> BillingResult<WebhookOutcome> {
        let payload = serde_json::json!({
            "invoice_id": &callback.id,
            "external_id": &callback.external_id,
            "status": &callback.status,
            "paid_amount": callback.paid_amount,
        });

        self.process(
            "xendit",
            &callback.event_reference(),
            payload,
            &callback.external_id,
            callback.settlement_action(),
        )
        .await
    }

    pub async fn handle_xendit_va(
        &self,
        callback: XenditVaCallback,
    ) -> BillingResult<WebhookOutcome> {
        let payload = serde_json::json!({
            "payment_id": &callback.payment_id,
            "external_id": &callback.external_id,
            "amount": callback.amount,
        });

        self.process(
            "xendit",
            &callback.event_reference(),
            payload,
            &callback.external_id,
            callback.settlement_action(),
        )
        .await
    }

    async fn process(
        &self,
        gateway: &str,
        event_reference: &str,
        payload: serde_json::Value,
        order_reference: &str,
        action: crate::gateways::SettlementAction,
    ) -> BillingResult<WebhookOutcome> {
        let Some(claim_id) = self.claim_event(gateway, event_reference, payload).await? else {
            tracing::info!(
                gateway = %gateway,
                event_reference = %event_reference,
                "Duplicate webhook event, skipping"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        };

        let result = self
            .purchases
            .finalize_from_gateway(order_reference, action)
            .await;

        match &result {
            Ok(outcome) => {
                let recorded = match outcome {
                    GatewayOutcome::Applied(_) => "success",
                    GatewayOutcome::AlreadySettled => "success",
                    GatewayOutcome::UnknownOrder | GatewayOutcome::Ignored => "ignored",
                };
                self.record_result(claim_id, recorded, None).await;
            }
            Err(e) => {
                self.record_result(claim_id, "error", Some(&e.to_string())).await;
            }
        }

        let outcome = result?;

        tracing::info!(
            gateway = %gateway,
            event_reference = %event_reference,
            order_reference = %order_reference,
            outcome = ?outcome,
            "Webhook event processed"
        );

        Ok(match outcome {
            GatewayOutcome::Applied(_) => WebhookOutcome::Processed,
            GatewayOutcome::AlreadySettled => WebhookOutcome::AlreadyProcessed,
            GatewayOutcome::UnknownOrder | GatewayOutcome::Ignored => WebhookOutcome::Ignored,
        })
    }

    /// Atomically claim exclusive processing rights for an event.
    ///
    /// Returns None when another delivery holds or completed the claim.
    /// Claims stuck in `processing` past the timeout, and claims whose
    /// processing errored, are re-claimable so gateway redelivery can heal
    /// them.
    async fn claim_event(
        &self,
        gateway: &str,
        event_reference: &str,
        payload: serde_json::Value,
    ) -> BillingResult<Option<Uuid>> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (gateway, event_reference, payload, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (gateway, event_reference) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW()
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(gateway)
        .bind(event_reference)
        .bind(payload)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                gateway = %gateway,
                event_reference = %event_reference,
                error = %e,
                "Failed to claim webhook event"
            );
            BillingError::Database(e)
        })?;

        Ok(claimed.map(|(id,)| id))
    }

    /// Record the processing result on the claim row. Retried once; the
    /// claim is what makes redelivery idempotent, so losing the update is
    /// worth a second attempt and a loud log.
    async fn record_result(&self, claim_id: Uuid, result: &str, error_message: Option<&str>) {
        for attempt in 0..2 {
            let update = sqlx::query(
                r#"
                UPDATE webhook_events
                SET processing_result = $2, error_message = $3
                WHERE id = $1
                "#,
            )
            .bind(claim_id)
            .bind(result)
            .bind(error_message)
            .execute(&self.pool)
            .await;

            match update {
                Ok(_) => return,
                Err(e) if attempt == 0 => {
                    tracing::warn!(
                        claim_id = %claim_id,
                        error = %e,
                        "Failed to record webhook result, retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        claim_id = %claim_id,
                        intended_result = %result,
                        error = %e,
                        "Failed to record webhook result after retry; claim stays 'processing' until timeout recovery"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_timeout_is_thirty_minutes() {
        assert_eq!(PROCESSING_TIMEOUT_MINUTES, 30);
    }

    #[test]
    fn test_outcome_equality() {
        assert_eq!(WebhookOutcome::Processed, WebhookOutcome::Processed);
        assert_ne!(WebhookOutcome::Processed, WebhookOutcome::AlreadyProcessed);
    }
}
