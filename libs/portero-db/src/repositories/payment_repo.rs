use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::models::ledger::{AffiliateEarning, PAYMENT_COMPLETED, PAYMENT_PENDING, Payment};

/// Ledger row joined with payer identity, for the admin feed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentWithUser {
    pub id: i64,
    pub username: String,
    pub amount: f64,
    pub payment_method: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EarningWithNames {
    pub id: i64,
    pub affiliate_name: String,
    pub source_name: String,
    pub level: i32,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch payment")
    }

    /// Authoritative idempotency lookup. The in-process cache may be cold or
    /// evicted; this check is the one that counts.
    pub async fn exists_provider_tx(&self, provider_tx_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE provider_tx_id = $1)")
                .bind(provider_tx_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check provider transaction")?;
        Ok(exists)
    }

    /// Records a manual (crypto) payment awaiting admin verification. No
    /// provider transaction id yet; one is synthesized at verification time.
    pub async fn insert_pending(
        &self,
        user_id: i64,
        plan_id: i64,
        amount: f64,
        method: &str,
        reference: &str,
    ) -> Result<Payment> {
        sqlx::query_as::<_, Payment>(
            "INSERT INTO payments (user_id, plan_id, amount, payment_method, reference, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(amount)
        .bind(method)
        .bind(reference)
        .bind(PAYMENT_PENDING)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record pending payment")
    }

    /// The only permitted mutation of a payment row: pending -> completed.
    pub async fn mark_completed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE payments SET status = $1 WHERE id = $2 AND status = $3")
            .bind(PAYMENT_COMPLETED)
            .bind(id)
            .bind(PAYMENT_PENDING)
            .execute(&self.pool)
            .await
            .context("Failed to complete payment")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_pending(&self) -> Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE status = $1 ORDER BY created_at DESC",
        )
        .bind(PAYMENT_PENDING)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending payments")
    }

    /// The full per-level breakdown behind one payment's `affiliate_amount`.
    pub async fn earnings_for_payment(&self, payment_id: i64) -> Result<Vec<AffiliateEarning>> {
        sqlx::query_as::<_, AffiliateEarning>(
            "SELECT * FROM affiliate_earnings WHERE payment_id = $1 ORDER BY level",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch payment earnings")
    }

    pub async fn recent_with_users(&self, limit: i64) -> Result<Vec<PaymentWithUser>> {
        sqlx::query_as::<_, PaymentWithUser>(
            r#"
            SELECT p.id,
                   COALESCE(u.username, u.full_name, 'Unknown') AS username,
                   p.amount, p.payment_method, p.status, p.created_at
            FROM payments p
            LEFT JOIN users u ON p.user_id = u.id
            ORDER BY p.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent payments")
    }

    /// Append-only commission feed for the admin ledger view.
    pub async fn earnings_feed(&self, limit: i64) -> Result<Vec<EarningWithNames>> {
        sqlx::query_as::<_, EarningWithNames>(
            r#"
            SELECT e.id,
                   COALESCE(a.username, a.full_name, 'Unknown') AS affiliate_name,
                   COALESCE(s.username, s.full_name, 'Unknown') AS source_name,
                   e.level, e.amount, e.created_at
            FROM affiliate_earnings e
            LEFT JOIN users a ON e.affiliate_id = a.id
            LEFT JOIN payments p ON e.payment_id = p.id
            LEFT JOIN users s ON p.user_id = s.id
            ORDER BY e.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch earnings feed")
    }
}
