// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StudiMed Shared Library
//!
//! Cross-crate building blocks for the billing backend: database pool
//! construction and migrations, the domain enums every crate speaks
//! (payment status, bundle type, payment method), the platform constants
//! store, and the soft-delete convention helper.

pub mod constants;
pub mod db;
pub mod types;

pub use constants::{ConstantEntry, ConstantsStore};
pub use db::{create_migration_pool, create_pool, run_migrations, soft_delete, SoftDeletable};
pub use types::{ActorType, BundleType, PaymentMethod, PaymentStatus, TypeParseError};
