//! API error type and HTTP mapping
//!
//! Services throw `BillingError`; this layer maps each variant onto a
//! status code and a `{"error": message}` body. Internal details never
//! reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use studimed_billing::BillingError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "Internal server error");
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            // State-guard failures (e.g. evidence on a non-pending
            // purchase) are client errors, not conflicts.
            BillingError::InvalidState(msg) => ApiError::Validation(msg),
            BillingError::NotFound(what) => ApiError::NotFound(what.to_string()),
            BillingError::InsufficientBalance { balance, requested } => ApiError::Conflict(
                format!("insufficient balance: have {}, need {}", balance, requested),
            ),
            BillingError::SignatureInvalid => {
                ApiError::Unauthorized("signature verification failed".to_string())
            }
            BillingError::Gateway(msg) => ApiError::Internal(format!("gateway: {}", msg)),
            BillingError::Storage(msg) => ApiError::Internal(format!("storage: {}", msg)),
            BillingError::Config(msg) => ApiError::Internal(format!("config: {}", msg)),
            BillingError::Database(e) => ApiError::Internal(format!("database: {}", e)),
            BillingError::Serialization(e) => ApiError::Internal(format!("serialization: {}", e)),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("database: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_error_status_mapping() {
        let cases: Vec<(BillingError, StatusCode)> = vec![
            (
                BillingError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                BillingError::InvalidState("not pending".into()),
                StatusCode::BAD_REQUEST,
            ),
            (BillingError::NotFound("purchase"), StatusCode::NOT_FOUND),
            (
                BillingError::InsufficientBalance {
                    balance: 10,
                    requested: 50,
                },
                StatusCode::CONFLICT,
            ),
            (BillingError::SignatureInvalid, StatusCode::UNAUTHORIZED),
            (
                BillingError::Gateway("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = ApiError::from(BillingError::Gateway("server key leaked here".into()));
        assert_eq!(err.to_string(), "internal server error");
    }
}
