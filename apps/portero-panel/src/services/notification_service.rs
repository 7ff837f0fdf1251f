use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use portero_db::models::outbox::{OUTBOX_FAILED, OUTBOX_PENDING, OUTBOX_SENT, OutboxMessage};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::bot_manager::BotManager;

const MAX_ATTEMPTS: i32 = 5;
const DRAIN_BATCH: i64 = 50;

/// Post-commit notification dispatch. Settlement enqueues rows inside its own
/// transaction; this service delivers them afterwards. A Telegram failure can
/// therefore never roll back or block a settlement, it only leaves a pending
/// row for the next drain pass.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    bot: Arc<BotManager>,
}

impl NotificationService {
    pub fn new(pool: PgPool, bot: Arc<BotManager>) -> Self {
        Self { pool, bot }
    }

    /// Queues a message as part of the caller's transaction.
    pub async fn enqueue_tx(
        tx: &mut Transaction<'_, Postgres>,
        telegram_id: i64,
        message: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO notification_outbox (telegram_id, message) VALUES ($1, $2)")
            .bind(telegram_id)
            .bind(message)
            .execute(&mut **tx)
            .await
            .context("Failed to enqueue notification")?;
        Ok(())
    }

    /// Sends one batch of pending messages. Returns how many went out.
    pub async fn drain_once(&self) -> Result<usize> {
        if !self.bot.is_enabled() {
            return Ok(0);
        }

        let batch = sqlx::query_as::<_, OutboxMessage>(
            "SELECT * FROM notification_outbox WHERE status = $1 ORDER BY id LIMIT $2",
        )
        .bind(OUTBOX_PENDING)
        .bind(DRAIN_BATCH)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending notifications")?;

        let mut sent = 0usize;
        for msg in &batch {
            match self.bot.send_notification(msg.telegram_id, &msg.message).await {
                Ok(()) => {
                    sqlx::query(
                        "UPDATE notification_outbox
                         SET status = $1, attempts = attempts + 1, sent_at = CURRENT_TIMESTAMP
                         WHERE id = $2",
                    )
                    .bind(OUTBOX_SENT)
                    .bind(msg.id)
                    .execute(&self.pool)
                    .await?;
                    sent += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to notify tg {} (attempt {}): {}",
                        msg.telegram_id,
                        msg.attempts + 1,
                        e
                    );
                    let next_status = if msg.attempts + 1 >= MAX_ATTEMPTS {
                        OUTBOX_FAILED
                    } else {
                        OUTBOX_PENDING
                    };
                    sqlx::query(
                        "UPDATE notification_outbox SET status = $1, attempts = attempts + 1 WHERE id = $2",
                    )
                    .bind(next_status)
                    .bind(msg.id)
                    .execute(&self.pool)
                    .await?;
                }
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if sent > 0 {
            info!("Dispatched {} notifications", sent);
        }
        Ok(sent)
    }

    /// Fire-and-forget drain trigger for the post-commit path.
    pub fn kick(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.drain_once().await {
                warn!("Notification drain failed: {}", e);
            }
        });
    }

    /// Background retry loop; picks up anything the post-commit kick missed.
    pub async fn run_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.drain_once().await {
                warn!("Notification drain failed: {}", e);
            }
        }
    }
}
