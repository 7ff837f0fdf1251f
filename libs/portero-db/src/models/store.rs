use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user is both a potential subscriber and a potential channel owner.
/// Owners sign up through the dashboard, subscribers through Telegram; both
/// land in the same table and share the referral graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: Option<i64>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub is_admin: bool,
    pub is_owner: bool,
    pub referral_code: String,
    /// Parent pointer of the referral forest. Must never form a cycle.
    pub referred_by_id: Option<i64>,
    /// Revenue from the user's own channels, USD.
    pub balance: f64,
    /// Commission income from the referral network, USD.
    pub affiliate_balance: f64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        self.full_name
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| format!("user-{}", self.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Channel {
    pub id: i64,
    pub owner_id: i64,
    pub telegram_id: Option<i64>,
    pub title: String,
    pub invite_link: Option<String>,
    pub welcome_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: i64,
    pub channel_id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Listing price in USD.
    pub price: f64,
    pub duration_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub is_trial: bool,
    pub created_at: DateTime<Utc>,
}
