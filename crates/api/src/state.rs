//! Application state

use sqlx::PgPool;
use std::sync::Arc;
use studimed_billing::BillingService;
use studimed_shared::ConstantsStore;

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
    pub constants: ConstantsStore,
}

impl AppState {
    /// Billing is the product here; missing gateway or storage config is a
    /// startup failure, not a degraded mode.
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        let billing = BillingService::from_env(pool.clone())
            .map_err(|e| anyhow::anyhow!("billing service init failed: {}", e))?;
        tracing::info!("Billing service initialized");

        let constants = ConstantsStore::new(pool.clone());

        Ok(Self {
            pool,
            config,
            jwt_manager,
            billing: Arc::new(billing),
            constants,
        })
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
        }
    }
}
