use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use portero_db::repositories::config_repo::ConfigRepository;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;

pub const MAX_AFFILIATE_LEVELS: usize = 10;

const DEFAULT_PLATFORM_FEE: f64 = 0.10;
const DEFAULT_USD_COP_RATE: f64 = 4000.0;
const DEFAULT_LEVEL_FEES: [f64; MAX_AFFILIATE_LEVELS] = [
    0.03, 0.01, 0.005, 0.003, 0.002, 0.001, 0.001, 0.001, 0.001, 0.001,
];

/// Typed snapshot of the fee configuration, taken once per settlement so the
/// commission walk never goes back to the database per key.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    pub platform_fee: f64,
    pub level_fees: [f64; MAX_AFFILIATE_LEVELS],
    pub usd_cop_rate: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_fee: DEFAULT_PLATFORM_FEE,
            level_fees: DEFAULT_LEVEL_FEES,
            usd_cop_rate: DEFAULT_USD_COP_RATE,
        }
    }
}

impl FeeSchedule {
    /// Fee fraction for a 1-based referral level; zero beyond the ceiling.
    pub fn level_fee(&self, level: usize) -> f64 {
        if level == 0 || level > MAX_AFFILIATE_LEVELS {
            return 0.0;
        }
        self.level_fees[level - 1]
    }
}

/// Stored overrides merged over compiled-in defaults, cached in memory.
/// Writes go through `set` which updates both the table and the cache.
#[derive(Debug, Clone)]
pub struct SettingsService {
    repo: ConfigRepository,
    cache: Arc<RwLock<HashMap<String, f64>>>,
}

impl SettingsService {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let service = Self {
            repo: ConfigRepository::new(pool),
            cache: Arc::new(RwLock::new(HashMap::new())),
        };
        service.reload_cache().await?;
        Ok(service)
    }

    pub async fn reload_cache(&self) -> Result<()> {
        let rows = self.repo.all().await?;
        let mut cache = self.cache.write().await;
        cache.clear();
        for entry in rows {
            cache.insert(entry.key, entry.value);
        }
        info!("Settings cache reloaded with {} overrides", cache.len());
        Ok(())
    }

    pub async fn get_or(&self, key: &str, default: f64) -> f64 {
        let cache = self.cache.read().await;
        cache.get(key).copied().unwrap_or(default)
    }

    pub async fn overrides(&self) -> HashMap<String, f64> {
        self.cache.read().await.clone()
    }

    pub async fn set(&self, key: &str, value: f64, description: Option<&str>) -> Result<()> {
        self.repo.upsert(key, value, description).await?;
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value);
        Ok(())
    }

    /// Snapshot taken once per settlement; the commission walk never touches
    /// the config store per key.
    pub async fn fee_schedule(&self) -> FeeSchedule {
        let mut schedule = FeeSchedule::default();
        schedule.platform_fee = self.get_or("platform_fee", schedule.platform_fee).await;
        schedule.usd_cop_rate = self.get_or("usd_cop_rate", schedule.usd_cop_rate).await;
        for level in 1..=MAX_AFFILIATE_LEVELS {
            let key = format!("affiliate_level_{}_fee", level);
            schedule.level_fees[level - 1] =
                self.get_or(&key, schedule.level_fees[level - 1]).await;
        }
        schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_fees_match_published_table() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.level_fee(1), 0.03);
        assert_eq!(fees.level_fee(2), 0.01);
        assert_eq!(fees.level_fee(3), 0.005);
        assert_eq!(fees.level_fee(4), 0.003);
        assert_eq!(fees.level_fee(5), 0.002);
        for level in 6..=10 {
            assert_eq!(fees.level_fee(level), 0.001);
        }
    }

    #[test]
    fn level_fee_is_zero_outside_bounds() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.level_fee(0), 0.0);
        assert_eq!(fees.level_fee(11), 0.0);
    }
}
