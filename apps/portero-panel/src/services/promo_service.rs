use anyhow::{Context, Result};
use portero_db::models::promo::Promotion;
use sqlx::PgPool;
use tracing::info;

/// Applies a discount fraction to a listing price, rounded to cents.
pub fn discounted_price(price: f64, fraction: f64) -> f64 {
    ((price * (1.0 - fraction)) * 100.0).round() / 100.0
}

/// Promo resolution happens at the adapter layer: the settlement engine only
/// ever sees the already-discounted final price.
#[derive(Debug, Clone)]
pub struct PromoService {
    pool: PgPool,
}

impl PromoService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, promo_id: i64) -> Result<Option<Promotion>> {
        sqlx::query_as::<_, Promotion>("SELECT * FROM promotions WHERE id = $1")
            .bind(promo_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch promotion")
    }

    /// Resolves a plan price through an optional discount promo. Inactive,
    /// exhausted or non-discount promos leave the price untouched.
    pub async fn resolve_discount(&self, promo_id: Option<i64>, price: f64) -> Result<f64> {
        let Some(promo_id) = promo_id else {
            return Ok(price);
        };
        let Some(promo) = self.get(promo_id).await? else {
            return Ok(price);
        };

        if promo.is_active && promo.promo_type == "discount" && !promo.is_exhausted() {
            Ok(discounted_price(price, promo.value))
        } else {
            Ok(price)
        }
    }

    pub async fn consume(&self, promo_id: i64) -> Result<()> {
        sqlx::query("UPDATE promotions SET current_uses = current_uses + 1 WHERE id = $1")
            .bind(promo_id)
            .execute(&self.pool)
            .await
            .context("Failed to increment promo uses")?;
        info!("Promo {} consumed", promo_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_rounds_to_cents() {
        assert_eq!(discounted_price(10.0, 0.15), 8.5);
        assert_eq!(discounted_price(9.99, 0.10), 8.99);
        assert_eq!(discounted_price(10.0, 0.0), 10.0);
    }
}
