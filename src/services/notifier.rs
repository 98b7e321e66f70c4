use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::StatusCache;
use crate::db::models::{Channel, EmailConfig, Notification, NotificationStatus, QueueMessage};
use crate::db::repository::NotificationStore;
use crate::error::{AppError, AppResult};
use crate::queue::QueuePublisher;
use crate::senders::{ChannelSender, SenderResolver};

pub const QUEUE_ROUTING_KEY: &str = "notifications";
pub const QUEUE_CONTENT_TYPE: &str = "application/json";

const BASE_BACKOFF_DELAY: Duration = Duration::from_secs(1);

/// Submission payload accepted by the HTTP layer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotificationRequest {
    pub payload: String,
    pub notification_date: DateTime<Utc>,
    #[serde(default)]
    pub sender_id: String,
    pub recipient_id: String,
    pub channel: Channel,
    #[serde(default)]
    pub email_config: Option<EmailConfig>,
}

/// Orchestrates the notification lifecycle: creation, scheduling, dispatch,
/// retries and cancellation.
///
/// Creation always publishes immediately; the worker re-defers messages
/// whose delivery instant is still in the future, keeping the queue as the
/// single delay timer. Transient send failures consume a retry and are
/// republished with exponential backoff; store and queue I/O failures
/// propagate so the message stays unacknowledged and is redelivered with
/// its retry counter unchanged.
pub struct NotifierService {
    store: Arc<dyn NotificationStore>,
    cache: Arc<dyn StatusCache>,
    publisher: Arc<dyn QueuePublisher>,
    senders: Arc<dyn SenderResolver>,
    notification_ttl: Duration,
    max_retries: i32,
}

impl NotifierService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        cache: Arc<dyn StatusCache>,
        publisher: Arc<dyn QueuePublisher>,
        senders: Arc<dyn SenderResolver>,
        notification_ttl: Duration,
        max_retries: i32,
    ) -> Self {
        Self {
            store,
            cache,
            publisher,
            senders,
            notification_ttl,
            max_retries,
        }
    }

    pub async fn create_notification(
        &self,
        req: CreateNotificationRequest,
    ) -> AppResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            payload: req.payload,
            created_at: Utc::now(),
            status: NotificationStatus::Pending,
            scheduled_at: req.notification_date,
            sender_id: req.sender_id,
            recipient_id: req.recipient_id,
            channel: req.channel,
            retries: 0,
        };

        tracing::info!(
            id = %notification.id,
            channel = %notification.channel.as_str(),
            notify_at = %notification.scheduled_at,
            "Notification created"
        );

        self.store.store(&notification).await?;

        if let Err(e) = self
            .cache
            .set(
                &notification.id,
                notification.status.as_str(),
                self.notification_ttl,
            )
            .await
        {
            tracing::error!(id = %notification.id, "Failed to cache status: {}", e);
        }

        let message = QueueMessage::new(notification.clone(), req.email_config);
        self.publisher
            .publish(&message.encode()?, QUEUE_ROUTING_KEY, QUEUE_CONTENT_TYPE)
            .await?;

        tracing::info!(id = %notification.id, "Notification published");

        Ok(notification)
    }

    pub async fn get_status(&self, id: &str) -> AppResult<NotificationStatus> {
        match self.cache.get(id).await {
            Ok(Some(cached)) => {
                if let Ok(status) = NotificationStatus::parse(&cached) {
                    return Ok(status);
                }
                tracing::debug!(id = %id, "Unparseable cached status, falling back to storage");
            }
            Ok(None) => {
                tracing::debug!(id = %id, "Cache miss, falling back to storage");
            }
            Err(e) => {
                tracing::warn!(id = %id, "Cache read failed: {}", e);
            }
        }

        let status = self.store.load_status_by_id(id).await?;

        if let Err(e) = self
            .cache
            .set(id, status.as_str(), self.notification_ttl)
            .await
        {
            tracing::warn!(id = %id, "Failed to cache status: {}", e);
        }

        Ok(status)
    }

    pub async fn get_notification(&self, id: &str) -> AppResult<Notification> {
        self.store.load_by_id(id).await
    }

    pub async fn cancel_notification(&self, id: &str) -> AppResult<()> {
        self.store.cancel_by_id(id).await?;

        if let Err(e) = self
            .cache
            .set(
                id,
                NotificationStatus::Cancelled.as_str(),
                self.notification_ttl,
            )
            .await
        {
            tracing::warn!(id = %id, "Failed to cache cancelled status: {}", e);
        }

        Ok(())
    }

    /// Handles one dequeued message. Returns `Ok` when the message is fully
    /// dealt with (including terminal failures and republished retries) and
    /// should be acknowledged; returns an error only when the store or the
    /// queue failed, in which case the caller leaves the message
    /// unacknowledged for redelivery.
    pub async fn process(&self, body: &[u8]) -> AppResult<()> {
        let message = QueueMessage::decode(body)?;
        let notification = message.notification.clone();

        // The cancellation check reads the store, not the cache, to avoid
        // acting on stale state.
        let status = match self.store.load_status_by_id(&notification.id).await {
            Ok(status) => status,
            Err(AppError::NotFound(_)) => {
                tracing::warn!(id = %notification.id, "Notification record missing, dropping message");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if status == NotificationStatus::Cancelled {
            tracing::info!(id = %notification.id, "Notification was cancelled, skipping processing");
            return Ok(());
        }

        // Messages arriving ahead of their delivery instant are re-deferred,
        // absorbing delayed-queue jitter.
        let now = Utc::now();
        if notification.scheduled_at > now {
            let delay = (notification.scheduled_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);

            tracing::info!(
                id = %notification.id,
                delay_ms = delay.as_millis() as u64,
                notify_at = %notification.scheduled_at,
                "Scheduling delayed delivery"
            );

            self.publisher
                .publish_delayed(
                    &message.encode()?,
                    QUEUE_ROUTING_KEY,
                    QUEUE_CONTENT_TYPE,
                    delay,
                )
                .await?;
            return Ok(());
        }

        let sender = match self.resolve_sender(&message) {
            Ok(sender) => sender,
            Err(e) => {
                // Unresolvable channel or invalid override configuration:
                // terminal for this notification, no retries.
                tracing::error!(
                    id = %notification.id,
                    channel = %notification.channel.as_str(),
                    "Failed to resolve sender, marking failed: {}",
                    e
                );
                self.update_status(
                    &notification.id,
                    NotificationStatus::Failed,
                    notification.retries,
                )
                .await?;
                return Ok(());
            }
        };

        tracing::info!(
            id = %notification.id,
            channel = %notification.channel.as_str(),
            "Sending notification"
        );

        match sender.send(&notification).await {
            Ok(()) => {
                self.update_status(
                    &notification.id,
                    NotificationStatus::Sent,
                    notification.retries,
                )
                .await?;
                tracing::info!(
                    id = %notification.id,
                    channel = %notification.channel.as_str(),
                    "Notification sent"
                );
                Ok(())
            }
            Err(send_err) => self.handle_send_error(message, send_err).await,
        }
    }

    fn resolve_sender(&self, message: &QueueMessage) -> AppResult<Arc<dyn ChannelSender>> {
        if message.notification.channel == Channel::Email {
            if let Some(config) = &message.email_config {
                return self.senders.email_sender_with_config(config);
            }
        }

        self.senders.sender_for(message.notification.channel)
    }

    async fn handle_send_error(
        &self,
        mut message: QueueMessage,
        send_err: AppError,
    ) -> AppResult<()> {
        let next_retries = message.notification.retries + 1;
        let id = message.notification.id.clone();

        if next_retries < self.max_retries {
            tracing::warn!(
                id = %id,
                retry = next_retries,
                "Send error, will retry: {}",
                send_err
            );

            self.update_status(&id, NotificationStatus::Pending, next_retries)
                .await?;

            message.notification.retries = next_retries;
            let backoff = self.backoff_delay(next_retries);

            tracing::info!(
                id = %id,
                retries = next_retries,
                backoff_ms = backoff.as_millis() as u64,
                "Republishing message for retry"
            );

            self.publisher
                .publish_delayed(
                    &message.encode()?,
                    QUEUE_ROUTING_KEY,
                    QUEUE_CONTENT_TYPE,
                    backoff,
                )
                .await?;

            Ok(())
        } else {
            self.update_status(&id, NotificationStatus::Failed, next_retries)
                .await?;

            tracing::error!(
                id = %id,
                retries = next_retries,
                "All retry attempts exhausted, notification marked as failed: {}",
                send_err
            );

            Ok(())
        }
    }

    async fn update_status(
        &self,
        id: &str,
        status: NotificationStatus,
        retries: i32,
    ) -> AppResult<()> {
        if let Err(e) = self.store.update_status_by_id(id, status, retries).await {
            tracing::error!(id = %id, "Failed to update notification status: {}", e);
            return Err(e);
        }

        if let Err(e) = self.cache.set(id, status.as_str(), self.notification_ttl).await {
            tracing::warn!(id = %id, "Failed to cache status: {}", e);
        }

        Ok(())
    }

    fn backoff_delay(&self, retry_count: i32) -> Duration {
        let multiplier = 2u32.saturating_pow(retry_count.max(0) as u32);
        BASE_BACKOFF_DELAY * multiplier
    }
}
