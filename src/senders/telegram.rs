use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::senders::ChannelSender;

/// Sends notification payloads to Telegram through the bot API.
#[derive(Clone, Debug)]
pub struct TelegramSender {
    bot: Bot,
    default_chat_id: i64,
}

impl TelegramSender {
    /// Creates the sender and verifies the bot token against the API.
    pub async fn new(token: String, default_chat_id: i64) -> AppResult<Self> {
        let bot = Bot::new(token);

        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self {
                    bot,
                    default_chat_id,
                })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    /// Numeric recipient ids address a chat directly; anything else falls
    /// back to the configured default chat.
    fn resolve_chat_id(&self, recipient_id: &str) -> i64 {
        recipient_id
            .trim()
            .parse::<i64>()
            .unwrap_or(self.default_chat_id)
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(&self, notification: &Notification) -> AppResult<()> {
        let chat_id = self.resolve_chat_id(&notification.recipient_id);

        tracing::info!(
            id = %notification.id,
            chat_id = chat_id,
            "Sending Telegram notification"
        );

        match self
            .bot
            .send_message(ChatId(chat_id), &notification.payload)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(message) => {
                tracing::debug!(
                    id = %notification.id,
                    chat_id = chat_id,
                    message_id = message.id.0,
                    "Telegram notification sent"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = %notification.id, "Failed to send Telegram message: {}", e);
                Err(AppError::Telegram(format!("Failed to send message: {}", e)))
            }
        }
    }
}
