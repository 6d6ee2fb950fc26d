//! Credit balance and ledger history routes

use axum::{
    extract::{Extension, Query, State},
    Json,
};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::routes::pricing::PageQuery;
use crate::state::AppState;

/// GET /api/v1/credits/balance
pub async fn balance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let balance = state.billing.ledger.get_balance(user.user_id).await?;
    Ok(Json(serde_json::json!({ "data": { "balance": balance } })))
}

/// GET /api/v1/credits/transactions
pub async fn transactions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let page = state
        .billing
        .ledger
        .transactions(
            user.user_id,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;

    Ok(Json(serde_json::json!({ "data": page })))
}
