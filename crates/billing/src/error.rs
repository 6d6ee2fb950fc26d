//! Billing error taxonomy
//!
//! Services throw typed errors; the API crate maps them onto HTTP status
//! codes. Database errors surface untranslated so transient failures come
//! back as 500s the caller can retry.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Bad input: unknown enum value, out-of-range amount, disallowed
    /// payment method. Maps to 400.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entity absent or not owned by the caller. Maps to 404.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The operation is not valid for the entity's current state, e.g.
    /// attaching evidence to a non-pending purchase. Maps to 400.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Debit would push the balance below zero. Maps to 409.
    #[error("insufficient balance: have {balance}, need {requested}")]
    InsufficientBalance { balance: i64, requested: i64 },

    /// Gateway signature or callback token did not verify. Maps to 401;
    /// no state is mutated.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// Outbound gateway call failed after retries.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Blob store upload or presign failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<studimed_shared::TypeParseError> for BillingError {
    fn from(err: studimed_shared::TypeParseError) -> Self {
        BillingError::Validation(err.to_string())
    }
}
