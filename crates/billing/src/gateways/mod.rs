//! Payment gateway integration
//!
//! Signature verification and status mapping for the two supported
//! gateways. Verification authenticates an inbound notification before
//! anything trusts its payload; mapping reduces gateway-specific status
//! vocabularies to the internal settlement actions the purchase state
//! machine understands.

pub mod midtrans;
pub mod xendit;

pub use midtrans::{MidtransClient, MidtransNotification};
pub use xendit::{verify_callback_token, XenditInvoiceCallback, XenditVaCallback};

use crate::error::{BillingError, BillingResult};

/// What a verified gateway notification asks the state machine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementAction {
    /// Payment settled; complete the purchase and grant its credits.
    Complete,
    /// Payment definitively failed; terminate the purchase.
    Fail,
    /// Payment still in flight; record nothing.
    Ignore,
}

/// Gateway secrets, loaded once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub midtrans_server_key: String,
    pub midtrans_base_url: String,
    pub xendit_callback_token: String,
}

impl GatewayConfig {
    pub fn from_env() -> BillingResult<Self> {
        let get = |key: &str| {
            std::env::var(key).map_err(|_| BillingError::Config(format!("{} is not set", key)))
        };

        Ok(Self {
            midtrans_server_key: get("MIDTRANS_SERVER_KEY")?,
            midtrans_base_url: std::env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| "https://api.midtrans.com".to_string()),
            xendit_callback_token: get("XENDIT_CALLBACK_TOKEN")?,
        })
    }
}
