use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::warn;

/// Thin wrapper around the notifier bot. Built once at startup; when no token
/// is configured every send becomes a logged no-op so settlement paths never
/// depend on Telegram being reachable.
pub struct BotManager {
    bot: Option<Bot>,
}

impl BotManager {
    pub fn new(token: Option<String>) -> Self {
        let bot = match token.filter(|t| !t.is_empty()) {
            Some(token) => Some(Bot::new(token)),
            None => {
                warn!("TELEGRAM_BOT_TOKEN not set, notifications are disabled");
                None
            }
        };
        Self { bot }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot.is_some()
    }

    pub async fn send_notification(&self, chat_id: i64, text: &str) -> Result<()> {
        let Some(bot) = self.bot.as_ref() else {
            return Ok(());
        };
        bot.send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Markdown)
            .await
            .context("Telegram send failed")?;
        Ok(())
    }
}
