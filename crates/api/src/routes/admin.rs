//! Admin back-office routes
//!
//! Protected by the admin role check in the route layer. Plan catalog
//! management, the manual-approval queue, bonus credit grants, the
//! constants store, invariant checks, and gateway reconciliation.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use studimed_billing::{
    ApprovalVerdict, BillingEvent, BillingEventType, EntryKind, GatewayOutcome, NewPlan, PlanUpdate,
};
use studimed_shared::{soft_delete, ActorType, PaymentMethod, SoftDeletable};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /admin/v1/pricing
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plans = state.billing.plans.list_all().await?;
    Ok(Json(serde_json::json!({ "data": plans })))
}

/// POST /admin/v1/pricing
pub async fn create_plan(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let plan = state.billing.plans.create(body).await?;

    state
        .billing
        .events
        .log(
            BillingEvent::new(BillingEventType::PlanCreated, ActorType::Admin)
                .actor(admin.user_id)
                .detail(serde_json::json!({"plan_id": plan.id, "name": &plan.name})),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "data": plan })),
    ))
}

/// PATCH /admin/v1/pricing/:id
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
    Json(body): Json<PlanUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan = state.billing.plans.update(plan_id, body).await?;

    state
        .billing
        .events
        .log(
            BillingEvent::new(BillingEventType::PlanUpdated, ActorType::Admin)
                .actor(admin.user_id)
                .detail(serde_json::json!({"plan_id": plan.id})),
        )
        .await;

    Ok(Json(serde_json::json!({ "data": plan })))
}

/// PATCH /admin/v1/pricing/:id/toggle
pub async fn toggle_plan(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let is_active = state.billing.plans.toggle_active(plan_id).await?;

    state
        .billing
        .events
        .log(
            BillingEvent::new(BillingEventType::PlanToggled, ActorType::Admin)
                .actor(admin.user_id)
                .detail(serde_json::json!({"plan_id": plan_id, "is_active": is_active})),
        )
        .await;

    Ok(Json(serde_json::json!({ "data": { "isActive": is_active } })))
}

/// DELETE /admin/v1/pricing/:id
///
/// Soft delete: the plan disappears from every listing but completed
/// purchases keep their snapshot and foreign key.
pub async fn delete_plan(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = soft_delete(&state.pool, SoftDeletable::PricingPlans, plan_id).await?;
    if !deleted {
        return Err(ApiError::NotFound("pricing plan".to_string()));
    }

    tracing::info!(plan_id = %plan_id, admin_id = %admin.user_id, "Pricing plan deleted");

    Ok(Json(serde_json::json!({ "message": { "success": true } })))
}

/// DELETE /admin/v1/constants/:id
pub async fn delete_constant(
    State(state): State<AppState>,
    Path(constant_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = soft_delete(&state.pool, SoftDeletable::PlatformConstants, constant_id).await?;
    if !deleted {
        return Err(ApiError::NotFound("constant".to_string()));
    }

    Ok(Json(serde_json::json!({ "message": { "success": true } })))
}

/// GET /admin/v1/pricing/purchases
///
/// Manual purchases awaiting a verdict, with evidence URLs.
pub async fn pending_purchases(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let purchases = state.billing.purchases.pending_approvals().await?;
    Ok(Json(serde_json::json!({ "data": purchases })))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub status: ApprovalVerdict,
}

/// POST /admin/v1/pricing/purchases/:id/approve
pub async fn approve_purchase(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Path(purchase_id): Path<Uuid>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .billing
        .purchases
        .approve_purchase(admin.user_id, purchase_id, body.status)
        .await?;

    Ok(Json(serde_json::json!({ "message": { "success": true } })))
}

/// POST /admin/v1/pricing/purchases/:id/reconcile
///
/// Re-query Midtrans for a purchase whose notifications never arrived and
/// apply whatever the gateway reports now.
pub async fn reconcile_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let purchase = state.billing.purchases.get(purchase_id).await?;

    if purchase.method()? != PaymentMethod::Midtrans {
        return Err(ApiError::Validation(
            "only midtrans purchases can be reconciled".to_string(),
        ));
    }
    let order_reference = purchase.gateway_reference.clone().ok_or_else(|| {
        ApiError::Validation("purchase has no gateway reference".to_string())
    })?;

    let status = state
        .billing
        .midtrans
        .transaction_status(&order_reference)
        .await?;
    let outcome = state
        .billing
        .purchases
        .finalize_from_gateway(&order_reference, status.settlement_action())
        .await?;

    let outcome = match outcome {
        GatewayOutcome::Applied(status) => format!("applied:{}", status),
        GatewayOutcome::AlreadySettled => "already_settled".to_string(),
        GatewayOutcome::UnknownOrder => "unknown_order".to_string(),
        GatewayOutcome::Ignored => "still_pending".to_string(),
    };

    Ok(Json(serde_json::json!({
        "data": {
            "outcome": outcome,
            "gatewayStatus": status.transaction_status,
        }
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreditsRequest {
    pub user_id: Uuid,
    pub amount: i64,
    pub description: Option<String>,
}

/// POST /admin/v1/credits/grant
pub async fn grant_credits(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<GrantCreditsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let description = body
        .description
        .unwrap_or_else(|| "Admin bonus grant".to_string());

    let balance = state
        .billing
        .ledger
        .credit(
            body.user_id,
            body.amount,
            EntryKind::AdminGrant,
            &description,
            None,
        )
        .await?;

    state
        .billing
        .events
        .log(
            BillingEvent::new(BillingEventType::CreditsGranted, ActorType::Admin)
                .actor(admin.user_id)
                .user(body.user_id)
                .detail(serde_json::json!({"amount": body.amount})),
        )
        .await;

    Ok(Json(serde_json::json!({ "data": { "balance": balance } })))
}

/// GET /admin/v1/constants
pub async fn list_constants(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.constants.list().await?;
    Ok(Json(serde_json::json!({ "data": entries })))
}

#[derive(Debug, Deserialize)]
pub struct SetConstantRequest {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// PUT /admin/v1/constants
pub async fn set_constant(
    State(state): State<AppState>,
    Extension(admin): Extension<AuthUser>,
    Json(body): Json<SetConstantRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.key.trim().is_empty() {
        return Err(ApiError::Validation("key is required".to_string()));
    }

    let entry = state
        .constants
        .set(
            &body.key,
            &body.value,
            body.description.as_deref(),
            Some(admin.user_id),
        )
        .await?;

    Ok(Json(serde_json::json!({ "data": entry })))
}

/// GET /admin/v1/billing/invariants
pub async fn run_invariants(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(serde_json::json!({ "data": summary })))
}
