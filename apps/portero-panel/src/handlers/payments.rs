use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::AppState;
use crate::handlers::ApiResult;
use crate::services::pay_service::PaymentLink;

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    pub user_id: i64,
    pub plan_id: i64,
    pub promo_id: Option<i64>,
    pub method: String,
}

pub async fn create_payment_link(
    State(state): State<AppState>,
    Json(req): Json<CreateLinkRequest>,
) -> ApiResult<Json<PaymentLink>> {
    let link = state
        .pay_service
        .create_payment_link(req.user_id, req.plan_id, req.promo_id, &req.method)
        .await?;
    Ok(Json(link))
}

/// Raw-body handler: the Stripe signature covers the exact bytes received.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    match state.pay_service.handle_stripe_webhook(&body, signature).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => {
            warn!("Stripe webhook rejected: {:#}", e);
            (StatusCode::BAD_REQUEST, Json(json!({ "status": "error" })))
        }
    }
}

pub async fn wompi_webhook(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    match state.pay_service.handle_wompi_webhook(&body).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("Wompi webhook rejected: {:#}", e);
            (StatusCode::BAD_REQUEST, Json(json!({ "status": "error" })))
        }
    }
}

pub async fn pending_payments(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let pending = state.billing_service.pending_payments().await?;
    Ok(Json(pending))
}

pub async fn recent_payments(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let payments = state.billing_service.recent_payments(20).await?;
    Ok(Json(payments))
}

/// Append-only commission feed for the admin ledger view.
pub async fn earnings_ledger(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let feed = state.billing_service.earnings_feed(100).await?;
    Ok(Json(feed))
}

/// Per-level breakdown of one payment, for auditing a single settlement.
pub async fn payment_earnings(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let earnings = state.billing_service.payment_earnings(payment_id).await?;
    Ok(Json(earnings))
}

/// Manual confirmation of a crypto transfer. Settles under a synthesized
/// provider transaction id, so retrying the endpoint cannot double-pay.
pub async fn verify_crypto_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
) -> impl IntoResponse {
    match state.pay_service.verify_crypto_payment(payment_id).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "verified", "payment_id": payment_id })),
        ),
        Err(e) => {
            warn!("Crypto verification failed for payment {}: {:#}", payment_id, e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "detail": e.to_string() })),
            )
        }
    }
}
