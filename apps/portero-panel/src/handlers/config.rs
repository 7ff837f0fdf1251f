use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::handlers::ApiResult;

/// Stored fee overrides; anything absent here runs on compiled-in defaults.
pub async fn list_config(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let overrides = state.settings.overrides().await;
    let fees = state.settings.fee_schedule().await;
    Ok(Json(json!({ "overrides": overrides, "effective": {
        "platform_fee": fees.platform_fee,
        "usd_cop_rate": fees.usd_cop_rate,
        "level_fees": fees.level_fees,
    }})))
}

#[derive(Deserialize)]
pub struct SetConfigRequest {
    pub key: String,
    pub value: f64,
    pub description: Option<String>,
}

pub async fn set_config(
    State(state): State<AppState>,
    Json(req): Json<SetConfigRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .settings
        .set(&req.key, req.value, req.description.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}
