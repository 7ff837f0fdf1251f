use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use portero_db::models::store::Subscription;
use portero_db::repositories::subscription_repo::SubscriptionRepository;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

/// Access window produced by one paid period.
pub fn stacked_end(current_end: DateTime<Utc>, duration_days: i32) -> DateTime<Utc> {
    current_end + Duration::days(duration_days as i64)
}

#[derive(Debug, Clone)]
pub struct SubscriptionService {
    repo: SubscriptionRepository,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: SubscriptionRepository::new(pool),
        }
    }

    /// Grants the paid period inside the caller's settlement transaction, so
    /// a payment row is never committed without its subscription and vice
    /// versa. An unexpired active subscription gets `duration_days` stacked
    /// on top of its current end date (paying early never shortens access);
    /// anything else starts a fresh window from now, retiring the stale row
    /// first so (user, plan) keeps at most one active subscription.
    pub async fn activate_or_extend_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan_id: i64,
        duration_days: i32,
    ) -> Result<Subscription> {
        let now = Utc::now();

        let existing = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions
             WHERE user_id = $1 AND plan_id = $2 AND is_active = TRUE
             ORDER BY end_date DESC LIMIT 1
             FOR UPDATE",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to look up active subscription")?;

        match existing {
            Some(sub) if sub.end_date > now => {
                let new_end = stacked_end(sub.end_date, duration_days);
                let updated = sqlx::query_as::<_, Subscription>(
                    "UPDATE subscriptions SET end_date = $1 WHERE id = $2 RETURNING *",
                )
                .bind(new_end)
                .bind(sub.id)
                .fetch_one(&mut **tx)
                .await
                .context("Failed to extend subscription")?;
                info!(
                    "Extended subscription {} for user {} to {}",
                    updated.id, user_id, updated.end_date
                );
                Ok(updated)
            }
            stale => {
                if let Some(stale) = stale {
                    sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1")
                        .bind(stale.id)
                        .execute(&mut **tx)
                        .await?;
                }
                let sub = sqlx::query_as::<_, Subscription>(
                    "INSERT INTO subscriptions (user_id, plan_id, start_date, end_date, is_active)
                     VALUES ($1, $2, $3, $4, TRUE)
                     RETURNING *",
                )
                .bind(user_id)
                .bind(plan_id)
                .bind(now)
                .bind(stacked_end(now, duration_days))
                .fetch_one(&mut **tx)
                .await
                .context("Failed to create subscription")?;
                info!(
                    "Created subscription {} for user {} until {}",
                    sub.id, user_id, sub.end_date
                );
                Ok(sub)
            }
        }
    }

    pub async fn for_user(&self, user_id: i64) -> Result<Vec<Subscription>> {
        self.repo.for_user(user_id).await
    }

    pub async fn deactivate_expired(&self) -> Result<u64> {
        let flipped = self.repo.deactivate_expired().await?;
        if flipped > 0 {
            info!("Deactivated {} expired subscriptions", flipped);
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renewal_stacks_on_current_end_date() {
        let current_end = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let stacked = stacked_end(current_end, 30);
        assert_eq!(stacked, Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn fresh_window_spans_exactly_the_plan_duration() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let end = stacked_end(now, 7);
        assert_eq!((end - now).num_days(), 7);
    }
}
