use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const OUTBOX_PENDING: &str = "pending";
pub const OUTBOX_SENT: &str = "sent";
pub const OUTBOX_FAILED: &str = "failed";

/// A Telegram notification queued inside a settlement transaction and
/// dispatched after commit. Keeps sends out of the money path while leaving
/// failures observable and retryable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxMessage {
    pub id: i64,
    pub telegram_id: i64,
    pub message: String,
    pub status: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
