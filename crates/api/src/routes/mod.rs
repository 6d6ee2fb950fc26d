//! Route table
//!
//! Four surfaces: public pricing, authenticated user endpoints, webhook
//! receivers (verified by signature/token instead of bearer auth), and
//! the admin back office.

pub mod admin;
pub mod credits;
pub mod pricing;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Json, Router,
};

use crate::auth::{require_admin, require_auth};
use crate::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/v1/pricing/plans", get(pricing::list_plans));

    let user = Router::new()
        .route("/api/v1/pricing/purchase", post(pricing::create_purchase))
        .route("/api/v1/pricing/history", get(pricing::purchase_history))
        .route(
            "/api/v1/pricing/history/{id}/evidence",
            post(pricing::upload_evidence),
        )
        .route("/api/v1/pricing/subscription", get(pricing::active_subscription))
        .route("/api/v1/credits/balance", get(credits::balance))
        .route("/api/v1/credits/transactions", get(credits::transactions))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let webhook = Router::new()
        .route(
            "/webhook/v1/midtrans/notification",
            post(webhooks::midtrans_notification),
        )
        .route("/webhook/v1/xendit/invoice", post(webhooks::xendit_invoice))
        .route("/webhook/v1/xendit/va", post(webhooks::xendit_va));

    let admin = Router::new()
        .route("/admin/v1/pricing", get(admin::list_plans).post(admin::create_plan))
        .route(
            "/admin/v1/pricing/{id}",
            patch(admin::update_plan).delete(admin::delete_plan),
        )
        .route("/admin/v1/pricing/{id}/toggle", patch(admin::toggle_plan))
        .route("/admin/v1/pricing/purchases", get(admin::pending_purchases))
        .route(
            "/admin/v1/pricing/purchases/{id}/approve",
            post(admin::approve_purchase),
        )
        .route(
            "/admin/v1/pricing/purchases/{id}/reconcile",
            post(admin::reconcile_purchase),
        )
        .route("/admin/v1/credits/grant", post(admin::grant_credits))
        .route(
            "/admin/v1/constants",
            get(admin::list_constants).put(admin::set_constant),
        )
        .route("/admin/v1/constants/{id}", delete(admin::delete_constant))
        .route("/admin/v1/billing/invariants", get(admin::run_invariants))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    public
        .merge(user)
        .merge(webhook)
        .merge(admin)
        .with_state(state)
}
