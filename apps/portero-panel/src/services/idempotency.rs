use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

const PROCESSED_TTL_SECS: u64 = 86_400 * 7;

/// Fast already-settled lookups keyed by provider transaction id. Purely an
/// optimization: the unique index on `payments.provider_tx_id` stays the
/// authority, so every error here degrades to "ask the database".
#[derive(Clone)]
pub struct TxCache {
    conn: ConnectionManager,
}

impl TxCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { conn })
    }

    fn key(provider_tx_id: &str) -> String {
        format!("processed_tx:{}", provider_tx_id)
    }

    pub async fn seen(&self, provider_tx_id: &str) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("GET")
            .arg(Self::key(provider_tx_id))
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(hit) => hit.is_some(),
            Err(e) => {
                debug!("Idempotency cache read failed ({}), falling back to DB", e);
                false
            }
        }
    }

    pub async fn mark(&self, provider_tx_id: &str) {
        let mut conn = self.conn.clone();
        let result = redis::cmd("SETEX")
            .arg(Self::key(provider_tx_id))
            .arg(PROCESSED_TTL_SECS)
            .arg("1")
            .query_async::<()>(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Failed to cache processed tx {}: {}", provider_tx_id, e);
        }
    }
}
