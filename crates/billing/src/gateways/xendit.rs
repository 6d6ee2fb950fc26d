//! Xendit callback verification and status mapping
//!
//! Xendit authenticates callbacks with a shared token in the
//! `x-callback-token` header rather than a payload signature. The compare
//! is constant-time; a leaked timing oracle on this header would let an
//! attacker mint settlements.

use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::SettlementAction;
use crate::error::{BillingError, BillingResult};

/// Header carrying the shared callback token.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Compare the provided callback token against the configured secret.
pub fn verify_callback_token(provided: Option<&str>, expected: &str) -> BillingResult<()> {
    let provided = provided.ok_or(BillingError::SignatureInvalid)?;

    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        tracing::warn!("Xendit callback token mismatch");
        Err(BillingError::SignatureInvalid)
    }
}

/// Invoice callback (`POST /webhook/v1/xendit/invoice`). `external_id` is
/// the order reference we issued at purchase creation.
#[derive(Debug, Clone, Deserialize)]
pub struct XenditInvoiceCallback {
    pub id: String,
    pub external_id: String,
    pub status: String,
    pub amount: Option<i64>,
    pub paid_amount: Option<i64>,
    pub payment_method: Option<String>,
}

impl XenditInvoiceCallback {
    pub fn settlement_action(&self) -> SettlementAction {
        match self.status.as_str() {
            "PAID" | "SETTLED" => SettlementAction::Complete,
            "EXPIRED" => SettlementAction::Fail,
            "PENDING" => SettlementAction::Ignore,
            other => {
                tracing::info!(
                    external_id = %self.external_id,
                    status = %other,
                    "Unhandled Xendit invoice status"
                );
                SettlementAction::Ignore
            }
        }
    }

    pub fn event_reference(&self) -> String {
        format!("{}:{}", self.id, self.status)
    }
}

/// Virtual-account payment callback (`POST /webhook/v1/xendit/va`). A VA
/// payment callback only fires once money arrived, so it always settles.
#[derive(Debug, Clone, Deserialize)]
pub struct XenditVaCallback {
    pub payment_id: String,
    pub external_id: String,
    pub amount: i64,
    pub callback_virtual_account_id: Option<String>,
}

impl XenditVaCallback {
    pub fn settlement_action(&self) -> SettlementAction {
        SettlementAction::Complete
    }

    /// `payment_id` is unique per payment, so it alone dedupes replays.
    pub fn event_reference(&self) -> String {
        self.payment_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_token_accepts_exact_match() {
        assert!(verify_callback_token(Some("tok-secret-1"), "tok-secret-1").is_ok());
    }

    #[test]
    fn test_callback_token_rejects_near_miss() {
        assert!(matches!(
            verify_callback_token(Some("tok-secret-2"), "tok-secret-1"),
            Err(BillingError::SignatureInvalid)
        ));
        assert!(matches!(
            verify_callback_token(Some("tok-secret-"), "tok-secret-1"),
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_callback_token_rejects_missing_header() {
        assert!(matches!(
            verify_callback_token(None, "tok-secret-1"),
            Err(BillingError::SignatureInvalid)
        ));
    }

    fn invoice(status: &str) -> XenditInvoiceCallback {
        XenditInvoiceCallback {
            id: "inv-5f27c1".to_string(),
            external_id: "SM-42".to_string(),
            status: status.to_string(),
            amount: Some(150_000),
            paid_amount: Some(150_000),
            payment_method: Some("BANK_TRANSFER".to_string()),
        }
    }

    #[test]
    fn test_invoice_status_mapping() {
        assert_eq!(invoice("PAID").settlement_action(), SettlementAction::Complete);
        assert_eq!(
            invoice("SETTLED").settlement_action(),
            SettlementAction::Complete
        );
        assert_eq!(invoice("EXPIRED").settlement_action(), SettlementAction::Fail);
        assert_eq!(invoice("PENDING").settlement_action(), SettlementAction::Ignore);
        assert_eq!(invoice("VOIDED").settlement_action(), SettlementAction::Ignore);
    }

    #[test]
    fn test_invoice_event_reference_includes_status() {
        assert_eq!(invoice("PAID").event_reference(), "inv-5f27c1:PAID");
        assert_ne!(
            invoice("PENDING").event_reference(),
            invoice("PAID").event_reference()
        );
    }

    #[test]
    fn test_va_payment_always_settles() {
        let va = XenditVaCallback {
            payment_id: "pay-81b2".to_string(),
            external_id: "SM-42".to_string(),
            amount: 150_000,
            callback_virtual_account_id: Some("va-1".to_string()),
        };
        assert_eq!(va.settlement_action(), SettlementAction::Complete);
        assert_eq!(va.event_reference(), "pay-81b2");
    }
}
