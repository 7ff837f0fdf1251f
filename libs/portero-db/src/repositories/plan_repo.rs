use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::{Channel, Plan};

#[derive(Debug, Clone)]
pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Plan>> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch plan")
    }

    pub async fn list_active_for_channel(&self, channel_id: i64) -> Result<Vec<Plan>> {
        sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE channel_id = $1 AND is_active = TRUE ORDER BY price ASC",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch channel plans")
    }

    pub async fn channel_of(&self, plan: &Plan) -> Result<Option<Channel>> {
        sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = $1")
            .bind(plan.channel_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch channel for plan")
    }
}
