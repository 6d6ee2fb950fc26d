// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StudiMed Billing Module
//!
//! Credit-based monetization for the study platform.
//!
//! ## Features
//!
//! - **Credit Ledger**: per-user balance with a full transaction audit trail
//! - **Pricing Plans**: admin-managed catalog of credit bundles,
//!   subscriptions, and hybrids
//! - **Purchases**: state machine from initiation to terminal settlement
//! - **Manual Payments**: evidence upload and admin approval flow
//! - **Gateways**: Midtrans and Xendit webhook verification and settlement
//! - **Subscriptions**: period tracking with expiry stacking
//! - **Invariants**: runnable consistency checks over the whole flow

pub mod attachments;
pub mod error;
pub mod events;
pub mod gateways;
pub mod invariants;
pub mod ledger;
pub mod plans;
pub mod purchases;
pub mod storage;
pub mod subscriptions;
pub mod webhooks;


// Error
pub use error::{BillingError, BillingResult};

// Ledger
pub use ledger::{EntryKind, LedgerEntry, LedgerPage, LedgerService};

// Plans
pub use plans::{NewPlan, PlanService, PlanUpdate, PricingPlan};

// Purchases
pub use purchases::{
    ApprovalVerdict, EvidenceReceipt, EvidenceUpload, GatewayOutcome, Purchase, PurchasePage,
    PurchaseService, PurchaseWithEvidence, MAX_EVIDENCE_BYTES,
};

// Subscriptions
pub use subscriptions::{SubscriptionPeriod, SubscriptionService};

// Storage
pub use storage::{BlobStorage, StorageConfig, PRESIGN_EXPIRY_SECS};

// Gateways
pub use gateways::{
    verify_callback_token, GatewayConfig, MidtransClient, MidtransNotification, SettlementAction,
    XenditInvoiceCallback, XenditVaCallback,
};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Events
pub use events::{BillingEvent, BillingEventLogger, BillingEventType};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub ledger: LedgerService,
    pub plans: PlanService,
    pub purchases: PurchaseService,
    pub subscriptions: SubscriptionService,
    pub storage: BlobStorage,
    pub webhooks: WebhookHandler,
    pub midtrans: MidtransClient,
    pub invariants: InvariantChecker,
    pub events: BillingEventLogger,
    pub gateway_config: GatewayConfig,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let gateway_config = GatewayConfig::from_env()?;
        let storage_config = StorageConfig::from_env()?;
        Ok(Self::new(gateway_config, storage_config, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(gateway_config: GatewayConfig, storage_config: StorageConfig, pool: PgPool) -> Self {
        let storage = BlobStorage::new(storage_config);
        let purchases = PurchaseService::new(pool.clone(), storage.clone());
        let midtrans = MidtransClient::new(
            &gateway_config.midtrans_base_url,
            &gateway_config.midtrans_server_key,
        );

        Self {
            ledger: LedgerService::new(pool.clone()),
            plans: PlanService::new(pool.clone()),
            purchases: purchases.clone(),
            subscriptions: SubscriptionService::new(pool.clone()),
            storage,
            webhooks: WebhookHandler::new(pool.clone(), purchases),
            midtrans,
            invariants: InvariantChecker::new(pool.clone()),
            events: BillingEventLogger::new(pool),
            gateway_config,
        }
    }
}
