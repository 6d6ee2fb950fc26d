//! Gateway webhook receivers
//!
//! Unauthenticated endpoints guarded by signature (Midtrans) or shared
//! callback token (Xendit). Verification failure returns 401 with zero
//! state mutation; a processing failure after verification returns 500 so
//! the gateway redelivers.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use studimed_billing::{
    gateways::xendit::CALLBACK_TOKEN_HEADER, verify_callback_token, MidtransNotification,
    WebhookOutcome, XenditInvoiceCallback, XenditVaCallback,
};

use crate::error::ApiResult;
use crate::state::AppState;

fn acknowledge(outcome: WebhookOutcome) -> Json<serde_json::Value> {
    let status = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::AlreadyProcessed => "already_processed",
        WebhookOutcome::Ignored => "ignored",
    };
    Json(serde_json::json!({ "status": status }))
}

/// POST /webhook/v1/midtrans/notification
pub async fn midtrans_notification(
    State(state): State<AppState>,
    Json(notification): Json<MidtransNotification>,
) -> ApiResult<Json<serde_json::Value>> {
    notification.verify_signature(&state.billing.gateway_config.midtrans_server_key)?;

    let outcome = state.billing.webhooks.handle_midtrans(notification).await?;

    Ok(acknowledge(outcome))
}

fn check_xendit_token(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let provided = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    verify_callback_token(provided, &state.billing.gateway_config.xendit_callback_token)?;

    Ok(())
}

/// POST /webhook/v1/xendit/invoice
pub async fn xendit_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<XenditInvoiceCallback>,
) -> ApiResult<Json<serde_json::Value>> {
    check_xendit_token(&state, &headers)?;

    let outcome = state.billing.webhooks.handle_xendit_invoice(callback).await?;

    Ok(acknowledge(outcome))
}

/// POST /webhook/v1/xendit/va
pub async fn xendit_va(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(callback): Json<XenditVaCallback>,
) -> ApiResult<Json<serde_json::Value>> {
    check_xendit_token(&state, &headers)?;

    let outcome = state.billing.webhooks.handle_xendit_va(callback).await?;

    Ok(acknowledge(outcome))
}

#[cfg(test)]
mod tests {
    use crate::auth::JwtManager;
    use crate::config::Config;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use studimed_billing::{BillingService, GatewayConfig, StorageConfig};
    use studimed_shared::ConstantsStore;
    use tower::ServiceExt;

    /// State over a lazy pool that never connects. Rejection paths must
    /// not touch the database, so these tests fail loudly if they do.
    fn test_state() -> AppState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/studimed_webhook_test")
            .unwrap();

        let gateway_config = GatewayConfig {
            midtrans_server_key: "SB-Mid-server-TestKey".to_string(),
            midtrans_base_url: "https://api.sandbox.midtrans.com".to_string(),
            xendit_callback_token: "xnd-callback-token".to_string(),
        };
        let storage_config = StorageConfig {
            base_url: "https://media.test".to_string(),
            bucket: "evidence".to_string(),
            upload_token: "tok".to_string(),
            signing_secret: "secret".to_string(),
        };

        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: "postgres://localhost/studimed_webhook_test".to_string(),
            database_direct_url: None,
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            jwt_expiry_hours: 24,
            allowed_origins: vec![],
        };

        AppState {
            pool: pool.clone(),
            jwt_manager: JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours),
            billing: Arc::new(BillingService::new(gateway_config, storage_config, pool.clone())),
            constants: ConstantsStore::new(pool),
            config,
        }
    }

    fn midtrans_body(signature: &str) -> String {
        serde_json::json!({
            "order_id": "SM-1",
            "status_code": "200",
            "gross_amount": "150000.00",
            "transaction_status": "settlement",
            "signature_key": signature,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_midtrans_bad_signature_is_unauthorized() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/v1/midtrans/notification")
                    .header("content-type", "application/json")
                    .body(Body::from(midtrans_body("deadbeef")))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_midtrans_missing_signature_is_unauthorized() {
        let app = create_router(test_state());

        let body = serde_json::json!({
            "order_id": "SM-1",
            "status_code": "200",
            "gross_amount": "150000.00",
            "transaction_status": "settlement",
        })
        .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/v1/midtrans/notification")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_xendit_invoice_wrong_token_is_unauthorized() {
        let app = create_router(test_state());

        let body = serde_json::json!({
            "id": "inv-1",
            "external_id": "SM-1",
            "status": "PAID",
        })
        .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/v1/xendit/invoice")
                    .header("content-type", "application/json")
                    .header("x-callback-token", "wrong-token")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_xendit_va_missing_token_is_unauthorized() {
        let app = create_router(test_state());

        let body = serde_json::json!({
            "payment_id": "pay-1",
            "external_id": "SM-1",
            "amount": 150000,
        })
        .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/v1/xendit/va")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_routes_require_auth() {
        let app = create_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/credits/balance")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = create_router(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
