use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::handlers::ApiResult;
use crate::services::referral_service::ReferralService;

/// Hierarchical referral network of a user, ten levels deep.
pub async fn network(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let children = state.referral_service.network_tree(user_id).await?;
    Ok(Json(json!({ "user_id": user_id, "children": children })))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let stats = state.referral_service.affiliate_stats(user_id).await?;
    Ok(Json(stats))
}

pub async fn leaderboard(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let board = state.referral_service.get_leaderboard(10).await?;
    Ok(Json(board))
}

#[derive(Deserialize)]
pub struct UpdateCodeRequest {
    /// Omitted -> a fresh random code is generated.
    pub code: Option<String>,
}

pub async fn update_referral_code(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateCodeRequest>,
) -> ApiResult<impl IntoResponse> {
    let code = req
        .code
        .unwrap_or_else(ReferralService::generate_referral_code);
    state
        .referral_service
        .update_referral_code(user_id, &code)
        .await?;
    Ok(Json(json!({ "ok": true, "code": code })))
}

#[derive(Deserialize)]
pub struct AttachReferrerRequest {
    pub referral_code: String,
}

/// Admin re-parenting of a user in the referral forest; rejects anything
/// that would introduce a cycle.
pub async fn attach_referrer(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<AttachReferrerRequest>,
) -> impl IntoResponse {
    match state
        .referral_service
        .attach_referrer(user_id, &req.referral_code)
        .await
    {
        Ok(referrer_name) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "new_referrer": referrer_name })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "detail": e.to_string() })),
        ),
    }
}
