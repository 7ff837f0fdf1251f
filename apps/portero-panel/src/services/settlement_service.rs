use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use portero_db::is_unique_violation;
use portero_db::models::ledger::{PAYMENT_COMPLETED, Payment};
use portero_db::models::store::{Channel, Subscription, User};
use portero_db::repositories::payment_repo::PaymentRepository;
use portero_db::repositories::plan_repo::PlanRepository;
use portero_db::repositories::subscription_repo::SubscriptionRepository;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::services::fx;
use crate::services::idempotency::TxCache;
use crate::services::notification_service::NotificationService;
use crate::services::subscription_service::SubscriptionService;
use crate::settings::{FeeSchedule, MAX_AFFILIATE_LEVELS, SettingsService};

/// Canonical settlement input. Every provider variant (Stripe webhook, Wompi
/// webhook, manual crypto verification) is reduced to this tuple by its
/// adapter before the engine runs; the amount is already net of any promo
/// discount.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub payer_id: i64,
    pub plan_id: i64,
    pub amount: f64,
    pub currency: String,
    pub method: String,
    pub provider_tx_id: Option<String>,
}

/// The three-way split plus per-level payouts, computed before any row is
/// written.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitBreakdown {
    pub commission_pool: f64,
    pub owner_net: f64,
    pub platform_net: f64,
    pub affiliate_total: f64,
    pub level_amounts: Vec<f64>,
}

/// Splits a normalized USD amount between channel owner, platform and `depth`
/// referral levels. The owner always nets the non-platform-fee portion; the
/// platform keeps only what remains of its pool after commissions, clamped at
/// zero — when configured level fees exceed the platform fee, the platform
/// absorbs the shortfall and affiliate payouts stay whole.
pub fn split_amounts(amount_usd: f64, depth: usize, fees: &FeeSchedule) -> SplitBreakdown {
    let commission_pool = amount_usd * fees.platform_fee;
    let owner_net = amount_usd - commission_pool;

    let depth = depth.min(MAX_AFFILIATE_LEVELS);
    let mut level_amounts = Vec::with_capacity(depth);
    let mut affiliate_total = 0.0;
    for level in 1..=depth {
        let amount = amount_usd * fees.level_fee(level);
        affiliate_total += amount;
        level_amounts.push(amount);
    }

    let platform_net = (commission_pool - affiliate_total).max(0.0);

    SplitBreakdown {
        commission_pool,
        owner_net,
        platform_net,
        affiliate_total,
        level_amounts,
    }
}

fn level_name(level: i32) -> &'static str {
    match level {
        1 => "Directo",
        2 => "Generación II",
        3 => "Generación III",
        4 => "Círculo Interno",
        5 => "Liderazgo",
        6 => "Elite",
        7 => "Embajador",
        8 => "Maestro",
        9 => "Leyenda",
        10 => "Infinitum",
        _ => "Red",
    }
}

fn commission_message(level: i32, amount: f64) -> String {
    format!(
        "💰 *¡Comisión de Red Recibida!*\n\nHas ganado *${:.2} USD* por una compra en tu *{}*.\nTu balance de afiliado ha sido actualizado.",
        amount,
        level_name(level)
    )
}

fn welcome_message(channel: &Channel) -> String {
    channel.welcome_message.clone().unwrap_or_else(|| {
        format!(
            "✅ *¡Acceso Activado!*\n\nYa puedes disfrutar de: *{}*.",
            channel.title
        )
    })
}

/// The settlement engine. One call settles one real-world payment: currency
/// normalization, the 10-level commission walk, the ledger write, balance
/// credits and subscription activation all commit in a single transaction;
/// notifications go through the outbox after commit.
pub struct SettlementService {
    pool: PgPool,
    settings: Arc<SettingsService>,
    plans: PlanRepository,
    payments: PaymentRepository,
    subscriptions: SubscriptionRepository,
    notifier: Arc<NotificationService>,
    tx_cache: Option<TxCache>,
}

impl SettlementService {
    pub fn new(
        pool: PgPool,
        settings: Arc<SettingsService>,
        notifier: Arc<NotificationService>,
        tx_cache: Option<TxCache>,
    ) -> Self {
        Self {
            plans: PlanRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            pool,
            settings,
            notifier,
            tx_cache,
        }
    }

    /// Settles one payment and grants the subscription. Returns `None` when
    /// the plan (or its channel/owner) does not exist; a replayed provider
    /// transaction id returns the previously granted subscription instead of
    /// settling twice.
    pub async fn activate_membership(
        &self,
        req: SettlementRequest,
    ) -> Result<Option<Subscription>> {
        let Some(plan) = self.plans.get(req.plan_id).await? else {
            warn!("Settlement for unknown plan {} ignored", req.plan_id);
            return Ok(None);
        };

        if let Some(tx_id) = req.provider_tx_id.as_deref() {
            if self.already_settled(tx_id).await? {
                info!("Provider tx {} already settled, returning prior grant", tx_id);
                return self
                    .subscriptions
                    .latest_for_user_plan(req.payer_id, req.plan_id)
                    .await;
            }
        }

        let Some(channel) = self.plans.channel_of(&plan).await? else {
            warn!("Plan {} points at a missing channel, settlement aborted", plan.id);
            return Ok(None);
        };

        let fees = self.settings.fee_schedule().await;
        let amount_usd = fx::normalize_to_usd(req.amount, &req.currency, &fees);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open settlement transaction")?;

        // Lock the owner row first, then each ancestor on the way up. Every
        // balance mutation below touches a row this transaction holds, so
        // concurrent settlements crediting the same referrer serialize here.
        let owner = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(channel.owner_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock channel owner")?;
        let Some(owner) = owner else {
            tx.rollback().await.ok();
            warn!("Channel {} has no owner row, settlement aborted", channel.id);
            return Ok(None);
        };

        let chain = Self::lock_referral_chain(&mut tx, &owner).await?;
        let split = split_amounts(amount_usd, chain.len(), &fees);

        let inserted = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments
                 (user_id, plan_id, amount, currency, payment_method, provider_tx_id,
                  status, platform_amount, owner_amount, affiliate_amount)
             VALUES ($1, $2, $3, 'usd', $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(req.payer_id)
        .bind(plan.id)
        .bind(amount_usd)
        .bind(&req.method)
        .bind(req.provider_tx_id.as_deref())
        .bind(PAYMENT_COMPLETED)
        .bind(split.platform_net)
        .bind(split.owner_net)
        .bind(split.affiliate_total)
        .fetch_one(&mut *tx)
        .await;

        let payment = match inserted {
            Ok(payment) => payment,
            Err(e) if is_unique_violation(&e) => {
                // Lost the insert race against a concurrent delivery of the
                // same webhook; the unique index on provider_tx_id is the
                // real linearization point. The winner owns the settlement.
                tx.rollback().await.ok();
                info!(
                    "Duplicate settlement for tx {:?}, deferring to winner",
                    req.provider_tx_id
                );
                return self
                    .subscriptions
                    .latest_for_user_plan(req.payer_id, req.plan_id)
                    .await;
            }
            Err(e) => return Err(e).context("Failed to insert payment"),
        };

        for (idx, ancestor) in chain.iter().enumerate() {
            let level = (idx + 1) as i32;
            let amount = split.level_amounts[idx];

            sqlx::query(
                "INSERT INTO affiliate_earnings (payment_id, affiliate_id, level, amount)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(payment.id)
            .bind(ancestor.id)
            .bind(level)
            .bind(amount)
            .execute(&mut *tx)
            .await
            .context("Failed to record affiliate earning")?;

            sqlx::query("UPDATE users SET affiliate_balance = affiliate_balance + $1 WHERE id = $2")
                .bind(amount)
                .bind(ancestor.id)
                .execute(&mut *tx)
                .await
                .context("Failed to credit affiliate balance")?;

            if let Some(tg_id) = ancestor.telegram_id {
                NotificationService::enqueue_tx(&mut tx, tg_id, &commission_message(level, amount))
                    .await?;
            }
        }

        sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
            .bind(split.owner_net)
            .bind(owner.id)
            .execute(&mut *tx)
            .await
            .context("Failed to credit owner balance")?;

        let sub = SubscriptionService::activate_or_extend_tx(
            &mut tx,
            req.payer_id,
            plan.id,
            plan.duration_days,
        )
        .await?;

        let payer_tg: Option<i64> =
            sqlx::query_scalar("SELECT telegram_id FROM users WHERE id = $1")
                .bind(req.payer_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to fetch payer telegram id")?
                .flatten();
        if let Some(tg_id) = payer_tg {
            NotificationService::enqueue_tx(&mut tx, tg_id, &welcome_message(&channel)).await?;
        }

        tx.commit().await.context("Failed to commit settlement")?;

        info!(
            "Settled payment {} (${:.2} usd via {}): owner {:.2}, platform {:.2}, affiliates {:.2} across {} levels",
            payment.id,
            amount_usd,
            req.method,
            split.owner_net,
            split.platform_net,
            split.affiliate_total,
            chain.len()
        );

        if let (Some(cache), Some(tx_id)) = (self.tx_cache.as_ref(), req.provider_tx_id.as_deref())
        {
            cache.mark(tx_id).await;
        }
        self.notifier.kick();

        Ok(Some(sub))
    }

    /// Idempotency guard. A cache hit is trusted (it is only ever written
    /// after a commit); a cache miss falls through to the authoritative
    /// unique-indexed lookup, since the cache may be cold or evicted.
    async fn already_settled(&self, provider_tx_id: &str) -> Result<bool> {
        if let Some(cache) = self.tx_cache.as_ref() {
            if cache.seen(provider_tx_id).await {
                return Ok(true);
            }
        }

        let settled = self.payments.exists_provider_tx(provider_tx_id).await?;
        if settled {
            if let Some(cache) = self.tx_cache.as_ref() {
                cache.mark(provider_tx_id).await;
            }
        }
        Ok(settled)
    }

    /// Walks `referred_by_id` upward from the owner, locking each ancestor
    /// row for the balance credit. Stops at the 10-level ceiling, at the
    /// forest root, or at the first repeated id — the graph is supposed to be
    /// a forest, but a corrupted cycle must not double-commission anyone.
    async fn lock_referral_chain(
        tx: &mut Transaction<'_, Postgres>,
        owner: &User,
    ) -> Result<Vec<User>> {
        let mut chain: Vec<User> = Vec::new();
        let mut visited: HashSet<i64> = HashSet::from([owner.id]);
        let mut cursor = owner.referred_by_id;

        while let Some(ancestor_id) = cursor {
            if chain.len() == MAX_AFFILIATE_LEVELS {
                break;
            }
            if !visited.insert(ancestor_id) {
                warn!(
                    "Referral cycle detected at user {}, truncating chain after level {}",
                    ancestor_id,
                    chain.len()
                );
                break;
            }

            let ancestor = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
                .bind(ancestor_id)
                .fetch_optional(&mut **tx)
                .await
                .context("Failed to lock referral ancestor")?;

            match ancestor {
                Some(user) => {
                    cursor = user.referred_by_id;
                    chain.push(user);
                }
                None => break,
            }
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn ten_dollar_plan_with_three_level_chain() {
        let fees = FeeSchedule::default();
        let split = split_amounts(10.0, 3, &fees);

        assert!((split.commission_pool - 1.0).abs() < EPS);
        assert!((split.owner_net - 9.0).abs() < EPS);
        assert_eq!(split.level_amounts.len(), 3);
        assert!((split.level_amounts[0] - 0.30).abs() < EPS);
        assert!((split.level_amounts[1] - 0.10).abs() < EPS);
        assert!((split.level_amounts[2] - 0.05).abs() < EPS);
        assert!((split.affiliate_total - 0.45).abs() < EPS);
        assert!((split.platform_net - 0.55).abs() < EPS);
    }

    #[test]
    fn owner_platform_and_affiliates_sum_to_the_amount() {
        let fees = FeeSchedule::default();
        for depth in 0..=10 {
            let split = split_amounts(10.0, depth, &fees);
            let total = split.owner_net + split.platform_net + split.affiliate_total;
            assert!(
                (total - 10.0).abs() < EPS,
                "depth {}: {} != 10.0",
                depth,
                total
            );
        }
    }

    #[test]
    fn platform_share_clamps_at_zero_instead_of_going_negative() {
        let fees = FeeSchedule {
            platform_fee: 0.01,
            ..FeeSchedule::default()
        };
        let split = split_amounts(10.0, 3, &fees);

        assert!((split.commission_pool - 0.10).abs() < EPS);
        assert!((split.affiliate_total - 0.45).abs() < EPS);
        assert_eq!(split.platform_net, 0.0);
        // The owner still nets the full non-platform-fee portion.
        assert!((split.owner_net - 9.90).abs() < EPS);
    }

    #[test]
    fn no_referrer_means_no_affiliate_payouts() {
        let fees = FeeSchedule::default();
        let split = split_amounts(25.0, 0, &fees);

        assert!(split.level_amounts.is_empty());
        assert_eq!(split.affiliate_total, 0.0);
        assert!((split.platform_net - split.commission_pool).abs() < EPS);
    }

    #[test]
    fn depth_is_capped_at_ten_levels() {
        let fees = FeeSchedule::default();
        let split = split_amounts(100.0, 25, &fees);
        assert_eq!(split.level_amounts.len(), 10);

        let expected: f64 = (1..=10).map(|l| 100.0 * fees.level_fee(l)).sum();
        assert!((split.affiliate_total - expected).abs() < EPS);
    }

    #[test]
    fn override_fees_flow_into_level_amounts() {
        let mut fees = FeeSchedule::default();
        fees.level_fees[0] = 0.05;
        let split = split_amounts(20.0, 1, &fees);
        assert!((split.level_amounts[0] - 1.0).abs() < EPS);
    }

    #[test]
    fn commission_message_names_the_level() {
        let msg = commission_message(1, 0.30);
        assert!(msg.contains("$0.30 USD"));
        assert!(msg.contains("Directo"));
        assert!(commission_message(10, 0.10).contains("Infinitum"));
    }
}
