use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Promotion {
    pub id: i64,
    pub channel_id: i64,
    /// Deep-link code (t.me/bot?start=CODE).
    pub code: String,
    /// 'discount' (value = fraction) or 'trial' (value = days).
    pub promo_type: String,
    pub value: f64,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Promotion {
    pub fn is_exhausted(&self) -> bool {
        match self.max_uses {
            Some(max) => self.current_uses >= max,
            None => false,
        }
    }
}
