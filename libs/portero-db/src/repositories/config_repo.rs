use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::config::ConfigEntry;

#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: PgPool,
}

impl ConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn all(&self) -> Result<Vec<ConfigEntry>> {
        sqlx::query_as::<_, ConfigEntry>("SELECT * FROM system_config ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch system config")
    }

    pub async fn upsert(&self, key: &str, value: f64, description: Option<&str>) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_config (key, value, description) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value,
                 description = COALESCE(EXCLUDED.description, system_config.description)",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .execute(&self.pool)
        .await
        .context("Failed to upsert config value")?;
        Ok(())
    }
}
