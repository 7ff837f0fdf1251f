use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::AppState;
use crate::handlers::ApiResult;

/// Balances plus per-channel subscriber counts and revenue, read straight
/// from the rows the settlement engine maintains.
pub async fn summary(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    match state.billing_service.owner_summary(user_id).await? {
        Some(summary) => Ok(Json(summary).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "user not found" })),
        )
            .into_response()),
    }
}

pub async fn subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let subs = state.subscription_service.for_user(user_id).await?;
    Ok(Json(subs))
}

/// Public storefront listing for one channel.
pub async fn channel_plans(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let plans = state.plan_repo.list_active_for_channel(channel_id).await?;
    Ok(Json(plans))
}
