//! Midtrans notification verification and status API client
//!
//! Notifications carry a `signature_key` computed as
//! `SHA512(order_id + status_code + gross_amount + server_key)`. A
//! notification is untrusted input until that signature verifies; the
//! comparison is constant-time.

use serde::Deserialize;
use sha2::{Digest, Sha512};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::SettlementAction;
use crate::error::{BillingError, BillingResult};

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_RETRIES: usize = 3;

/// Payload of `POST /webhook/v1/midtrans/notification`, and equally the
/// response body of the transaction status API.
#[derive(Debug, Clone, Deserialize)]
pub struct MidtransNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub transaction_id: Option<String>,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub payment_type: Option<String>,
    pub signature_key: Option<String>,
}

impl MidtransNotification {
    /// Verify the embedded signature against the configured server key.
    pub fn verify_signature(&self, server_key: &str) -> BillingResult<()> {
        let provided = self
            .signature_key
            .as_deref()
            .ok_or(BillingError::SignatureInvalid)?;

        let mut hasher = Sha512::new();
        hasher.update(self.order_id.as_bytes());
        hasher.update(self.status_code.as_bytes());
        hasher.update(self.gross_amount.as_bytes());
        hasher.update(server_key.as_bytes());
        let expected = hex::encode(hasher.finalize());

        if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            Ok(())
        } else {
            tracing::warn!(
                order_id = %self.order_id,
                transaction_status = %self.transaction_status,
                "Midtrans signature mismatch"
            );
            Err(BillingError::SignatureInvalid)
        }
    }

    /// Reduce the Midtrans status vocabulary to a settlement action.
    ///
    /// `capture` is only money-in-hand when fraud screening accepted it;
    /// a `challenge` stays in flight until Midtrans sends the follow-up.
    pub fn settlement_action(&self) -> SettlementAction {
        match self.transaction_status.as_str() {
            "capture" => match self.fraud_status.as_deref() {
                Some("accept") | None => SettlementAction::Complete,
                Some("challenge") => SettlementAction::Ignore,
                Some(_) => SettlementAction::Fail,
            },
            "settlement" => SettlementAction::Complete,
            "deny" | "cancel" | "expire" | "failure" => SettlementAction::Fail,
            "pending" => SettlementAction::Ignore,
            other => {
                tracing::info!(
                    order_id = %self.order_id,
                    transaction_status = %other,
                    "Unhandled Midtrans transaction status"
                );
                SettlementAction::Ignore
            }
        }
    }

    /// Idempotency reference for the webhook claim table. Includes the
    /// status so a legitimate `pending` -> `settlement` progression is two
    /// distinct events while a redelivery of either is a duplicate.
    pub fn event_reference(&self) -> String {
        format!("{}:{}", self.order_id, self.transaction_status)
    }
}

/// Client for the Midtrans transaction status API, used by the admin
/// reconcile flow to re-query a purchase the webhooks never settled.
#[derive(Clone)]
pub struct MidtransClient {
    http: reqwest::Client,
    base_url: String,
    server_key: String,
}

impl MidtransClient {
    pub fn new(base_url: &str, server_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(STATUS_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            server_key: server_key.to_string(),
        }
    }

    /// `GET /v2/{order_id}/status` with Basic auth (server key as
    /// username, empty password). Timeouts and 5xx responses are retried
    /// with exponential backoff; the caller sees only the final failure.
    pub async fn transaction_status(&self, order_id: &str) -> BillingResult<MidtransNotification> {
        let url = format!("{}/v2/{}/status", self.base_url, order_id);

        // 200ms, 400ms, 800ms
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .map(jitter)
            .take(STATUS_RETRIES);

        let response = Retry::spawn(strategy, || async {
            let response = self
                .http
                .get(&url)
                .basic_auth(&self.server_key, Some(""))
                .send()
                .await
                .map_err(|e| BillingError::Gateway(format!("status request failed: {}", e)))?;

            if response.status().is_server_error() {
                return Err(BillingError::Gateway(format!(
                    "status API returned {}",
                    response.status()
                )));
            }

            Ok(response)
        })
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::NotFound("midtrans transaction"));
        }
        if !response.status().is_success() {
            return Err(BillingError::Gateway(format!(
                "status API returned {}",
                response.status()
            )));
        }

        let notification: MidtransNotification = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("invalid status response: {}", e)))?;

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_KEY: &str = "SB-Mid-server-TestKey";

    fn notification(status: &str, fraud: Option<&str>) -> MidtransNotification {
        MidtransNotification {
            order_id: "ORDER-101200410438".to_string(),
            status_code: "200".to_string(),
            gross_amount: "480000.00".to_string(),
            transaction_id: Some("9aed5972-5b6a-401e-894b-a32c91ed1a3a".to_string()),
            transaction_status: status.to_string(),
            fraud_status: fraud.map(String::from),
            payment_type: Some("bank_transfer".to_string()),
            signature_key: None,
        }
    }

    #[test]
    fn test_signature_known_vector() {
        // SHA512("ORDER-101200410438" + "200" + "480000.00" + server key)
        let mut n = notification("settlement", None);
        n.signature_key = Some(
            "22533c7cb445de6dd4eef28500acf20737414af6f188144d808bc6548acbbe17\
             61b07f9f163c5bb82faea2029ec837da83ba5d87f895a0d8537bbcdcf93b5e6e"
                .to_string(),
        );

        assert!(n.verify_signature(SERVER_KEY).is_ok());
    }

    #[test]
    fn test_signature_rejects_altered_amount() {
        let mut n = notification("settlement", None);
        n.signature_key = Some(
            "22533c7cb445de6dd4eef28500acf20737414af6f188144d808bc6548acbbe17\
             61b07f9f163c5bb82faea2029ec837da83ba5d87f895a0d8537bbcdcf93b5e6e"
                .to_string(),
        );
        n.gross_amount = "1.00".to_string();

        assert!(matches!(
            n.verify_signature(SERVER_KEY),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_signature_rejects_wrong_server_key() {
        let mut n = notification("settlement", None);
        n.signature_key = Some(
            "22533c7cb445de6dd4eef28500acf20737414af6f188144d808bc6548acbbe17\
             61b07f9f163c5bb82faea2029ec837da83ba5d87f895a0d8537bbcdcf93b5e6e"
                .to_string(),
        );

        assert!(n.verify_signature("SB-Mid-server-OtherKey").is_err());
    }

    #[test]
    fn test_signature_missing_is_rejected() {
        let n = notification("settlement", None);
        assert!(matches!(
            n.verify_signature(SERVER_KEY),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_settlement_statuses() {
        assert_eq!(
            notification("settlement", None).settlement_action(),
            SettlementAction::Complete
        );
        assert_eq!(
            notification("capture", Some("accept")).settlement_action(),
            SettlementAction::Complete
        );
        assert_eq!(
            notification("capture", Some("challenge")).settlement_action(),
            SettlementAction::Ignore
        );
        assert_eq!(
            notification("capture", Some("deny")).settlement_action(),
            SettlementAction::Fail
        );
    }

    #[test]
    fn test_failure_statuses() {
        for status in ["deny", "cancel", "expire", "failure"] {
            assert_eq!(
                notification(status, None).settlement_action(),
                SettlementAction::Fail,
                "status {} should fail the purchase",
                status
            );
        }
    }

    #[test]
    fn test_pending_and_unknown_are_ignored() {
        assert_eq!(
            notification("pending", None).settlement_action(),
            SettlementAction::Ignore
        );
        assert_eq!(
            notification("refund", None).settlement_action(),
            SettlementAction::Ignore
        );
    }

    #[test]
    fn test_event_reference_distinguishes_statuses() {
        let pending = notification("pending", None);
        let settled = notification("settlement", None);
        assert_ne!(pending.event_reference(), settled.event_reference());
        assert_eq!(settled.event_reference(), "ORDER-101200410438:settlement");
    }

    #[tokio::test]
    async fn test_transaction_status_fetch() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "order_id": "SM-123",
            "status_code": "200",
            "gross_amount": "150000.00",
            "transaction_id": "tx-1",
            "transaction_status": "settlement",
            "payment_type": "qris"
        });
        let mock = server
            .mock("GET", "/v2/SM-123/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let client = MidtransClient::new(&server.url(), SERVER_KEY);
        let status = client.transaction_status("SM-123").await.unwrap();

        assert_eq!(status.transaction_status, "settlement");
        assert_eq!(status.settlement_action(), SettlementAction::Complete);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transaction_status_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/SM-missing/status")
            .with_status(404)
            .create_async()
            .await;

        let client = MidtransClient::new(&server.url(), SERVER_KEY);
        let err = client.transaction_status("SM-missing").await.unwrap_err();

        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_transaction_status_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        // Persistent 503: every retry lands here, so the hit count proves
        // the backoff ran before the final error surfaced.
        let failing = server
            .mock("GET", "/v2/SM-flaky/status")
            .with_status(503)
            .expect(STATUS_RETRIES + 1)
            .create_async()
            .await;

        let client = MidtransClient::new(&server.url(), SERVER_KEY);
        let err = client.transaction_status("SM-flaky").await.unwrap_err();

        assert!(matches!(err, BillingError::Gateway(_)));
        failing.assert_async().await;
    }
}
