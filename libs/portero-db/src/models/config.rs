use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Dynamic business-rule overrides (platform fee, per-level affiliate fees,
/// FX rate). Absent keys fall back to compiled-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConfigEntry {
    pub id: i64,
    pub key: String,
    pub value: f64,
    pub description: Option<String>,
}
