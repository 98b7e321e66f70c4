pub mod email;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::models::{Channel, EmailConfig, Notification};
use crate::error::{AppError, AppResult};

pub use email::EmailSender;
pub use telegram::TelegramSender;

/// One dispatch attempt over a delivery channel. Errors are treated as
/// transient by the caller; only the retry cap bounds loss.
#[async_trait]
pub trait ChannelSender: Send + Sync + std::fmt::Debug {
    async fn send(&self, notification: &Notification) -> AppResult<()>;
}

/// Resolves a channel tag to its sender, and constructs one-shot email
/// senders bound to a per-notification configuration override.
pub trait SenderResolver: Send + Sync {
    fn sender_for(&self, channel: Channel) -> AppResult<Arc<dyn ChannelSender>>;

    fn email_sender_with_config(&self, config: &EmailConfig) -> AppResult<Arc<dyn ChannelSender>>;
}

/// Holds the pre-constructed senders. Senders are immutable after
/// initialization and shared across workers; overridden email senders are
/// built fresh per request.
pub struct SenderRegistry {
    telegram: Option<Arc<TelegramSender>>,
    email: Option<Arc<EmailSender>>,
}

impl SenderRegistry {
    pub fn new(telegram: Option<TelegramSender>, email: Option<EmailSender>) -> Self {
        Self {
            telegram: telegram.map(Arc::new),
            email: email.map(Arc::new),
        }
    }
}

impl SenderResolver for SenderRegistry {
    fn sender_for(&self, channel: Channel) -> AppResult<Arc<dyn ChannelSender>> {
        match channel {
            Channel::Telegram => self
                .telegram
                .clone()
                .map(|s| s as Arc<dyn ChannelSender>)
                .ok_or_else(|| AppError::Config("telegram sender not configured".to_string())),
            Channel::Email => self
                .email
                .clone()
                .map(|s| s as Arc<dyn ChannelSender>)
                .ok_or_else(|| AppError::Config("email sender not configured".to_string())),
        }
    }

    fn email_sender_with_config(&self, config: &EmailConfig) -> AppResult<Arc<dyn ChannelSender>> {
        let sender = EmailSender::new(config.clone())?;
        Ok(Arc::new(sender))
    }
}
