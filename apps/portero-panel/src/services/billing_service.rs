use anyhow::{Context, Result};
use portero_db::models::ledger::{AffiliateEarning, PAYMENT_COMPLETED, Payment};
use portero_db::repositories::payment_repo::{
    EarningWithNames, PaymentRepository, PaymentWithUser,
};
use portero_db::repositories::subscription_repo::SubscriptionRepository;
use portero_db::repositories::user_repo::UserRepository;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Serialize)]
pub struct OwnerChannelStats {
    pub channel_id: i64,
    pub title: String,
    pub active_subscribers: i64,
    pub revenue: f64,
}

/// Dashboard read model for a channel owner: live balances plus per-channel
/// subscriber counts and lifetime revenue, all derived from ledger rows the
/// settlement engine wrote.
#[derive(Debug, Serialize)]
pub struct OwnerSummary {
    pub user_id: i64,
    pub name: String,
    pub balance: f64,
    pub affiliate_balance: f64,
    pub channels: Vec<OwnerChannelStats>,
}

#[derive(Debug, Clone)]
pub struct BillingService {
    pool: PgPool,
    users: UserRepository,
    payments: PaymentRepository,
    subscriptions: SubscriptionRepository,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn recent_payments(&self, limit: i64) -> Result<Vec<PaymentWithUser>> {
        self.payments.recent_with_users(limit).await
    }

    pub async fn earnings_feed(&self, limit: i64) -> Result<Vec<EarningWithNames>> {
        self.payments.earnings_feed(limit).await
    }

    pub async fn pending_payments(&self) -> Result<Vec<Payment>> {
        self.payments.list_pending().await
    }

    pub async fn payment_earnings(&self, payment_id: i64) -> Result<Vec<AffiliateEarning>> {
        self.payments.earnings_for_payment(payment_id).await
    }

    pub async fn owner_summary(&self, owner_id: i64) -> Result<Option<OwnerSummary>> {
        let Some(user) = self.users.get_by_id(owner_id).await? else {
            return Ok(None);
        };

        let channels: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, title FROM channels WHERE owner_id = $1 ORDER BY id")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch owner channels")?;

        let mut stats = Vec::with_capacity(channels.len());
        for (channel_id, title) in channels {
            let active_subscribers = self
                .subscriptions
                .count_active_for_channel(channel_id)
                .await?;
            let revenue: f64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(p.owner_amount), 0)
                 FROM payments p
                 JOIN plans pl ON p.plan_id = pl.id
                 WHERE pl.channel_id = $1 AND p.status = $2",
            )
            .bind(channel_id)
            .bind(PAYMENT_COMPLETED)
            .fetch_one(&self.pool)
            .await
            .context("Failed to sum channel revenue")?;

            stats.push(OwnerChannelStats {
                channel_id,
                title,
                active_subscribers,
                revenue,
            });
        }

        Ok(Some(OwnerSummary {
            user_id: user.id,
            name: user.display_name(),
            balance: user.balance,
            affiliate_balance: user.affiliate_balance,
            channels: stats,
        }))
    }
}
