use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const PAYMENT_PENDING: &str = "pending";
pub const PAYMENT_COMPLETED: &str = "completed";
pub const PAYMENT_FAILED: &str = "failed";

/// One row per settled (or pending-manual) transaction. Immutable after
/// creation except for the pending -> completed flip on manually verified
/// methods. `provider_tx_id` carries the unique index that serializes
/// duplicate webhook deliveries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    /// Normalized amount, USD.
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub provider_tx_id: Option<String>,
    pub reference: Option<String>,
    pub status: String,
    pub platform_amount: f64,
    pub owner_amount: f64,
    pub affiliate_amount: f64,
    pub created_at: DateTime<Utc>,
}

/// One row per (payment, ancestor level); up to ten per payment. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateEarning {
    pub id: i64,
    pub payment_id: i64,
    pub affiliate_id: i64,
    pub level: i32,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}
