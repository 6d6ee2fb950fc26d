//! Pricing and purchase routes

use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use studimed_billing::EvidenceUpload;
use studimed_shared::PaymentMethod;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// GET /api/v1/pricing/plans
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plans = state.billing.plans.list_active().await?;
    Ok(Json(serde_json::json!({ "data": plans })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePurchaseRequest {
    pub plan_id: Uuid,
    pub payment_method: PaymentMethod,
}

/// POST /api/v1/pricing/purchase
pub async fn create_purchase(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreatePurchaseRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let purchase = state
        .billing
        .purchases
        .create_purchase(user.user_id, body.plan_id, body.payment_method)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": purchase })),
    ))
}

/// GET /api/v1/pricing/history
pub async fn purchase_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .billing
        .purchases
        .history(
            user.user_id,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;

    Ok(Json(serde_json::json!({ "data": page })))
}

/// POST /api/v1/pricing/history/:id/evidence
///
/// Multipart upload of a payment-evidence image for a manual purchase.
pub async fn upload_evidence(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut upload: Option<EvidenceUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {}", e)))?
    {
        // The evidence image is the first file field; non-file fields are
        // ignored.
        let Some(filename) = field.file_name().map(String::from) else {
            continue;
        };
        let content_type = field
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {}", e)))?;

        upload = Some(EvidenceUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload =
        upload.ok_or_else(|| ApiError::Validation("no evidence file in request".to_string()))?;

    let receipt = state
        .billing
        .purchases
        .attach_evidence(user.user_id, purchase_id, upload)
        .await?;

    Ok(Json(serde_json::json!({ "data": receipt })))
}

/// GET /api/v1/pricing/subscription
pub async fn active_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let period = state
        .billing
        .subscriptions
        .active_for_user(user.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "data": period })))
}
