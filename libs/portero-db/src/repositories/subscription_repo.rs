use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::Subscription;

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent subscription for a (user, plan) pair, active or not.
    /// Used by the idempotency guard to answer a replayed webhook.
    pub async fn latest_for_user_plan(
        &self,
        user_id: i64,
        plan_id: i64,
    ) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND plan_id = $2
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest subscription")
    }

    pub async fn for_user(&self, user_id: i64) -> Result<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user subscriptions")
    }

    pub async fn count_active_for_channel(&self, channel_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions s
             JOIN plans p ON s.plan_id = p.id
             WHERE p.channel_id = $1 AND s.is_active = TRUE AND s.end_date > CURRENT_TIMESTAMP",
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count active subscribers")?;
        Ok(count)
    }

    /// Flips lapsed subscriptions to inactive. Run periodically; the Telegram
    /// kick itself happens elsewhere.
    pub async fn deactivate_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = FALSE
             WHERE is_active = TRUE AND end_date < CURRENT_TIMESTAMP",
        )
        .execute(&self.pool)
        .await
        .context("Failed to deactivate expired subscriptions")?;
        Ok(result.rows_affected())
    }
}
