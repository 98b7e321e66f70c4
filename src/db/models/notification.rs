use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Delivery status of a notification.
///
/// `Pending` is the only non-terminal state. `Sent`, `Failed` and
/// `Cancelled` are terminal: once a record enters one of them it is never
/// transitioned away (a cancelled notification is skipped by workers even
/// if its message is still in flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "unknown notification status: {other}"
            ))),
        }
    }
}

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Email,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Email => "email",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "telegram" => Ok(Channel::Telegram),
            "email" => Ok(Channel::Email),
            other => Err(AppError::Internal(anyhow::anyhow!(
                "unknown channel: {other}"
            ))),
        }
    }
}

/// A scheduled notification. The database row in `notifications` is the
/// authoritative copy; queue messages carry a transient snapshot of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,

    /// Free-form text body delivered to the recipient.
    pub payload: String,

    /// Instant of submission.
    #[serde(rename = "date_created")]
    pub created_at: DateTime<Utc>,

    pub status: NotificationStatus,

    /// Instant at which delivery should first be attempted. A value in the
    /// past means "dispatch immediately".
    #[serde(rename = "notification_date")]
    pub scheduled_at: DateTime<Utc>,

    /// Informational identifier of the submitter; not authenticated.
    pub sender_id: String,

    /// Channel-specific destination: an email address for the email
    /// channel, a chat id for telegram.
    pub recipient_id: String,

    pub channel: Channel,

    /// Number of dispatch attempts already consumed.
    pub retries: i32,
}

/// Per-notification SMTP configuration. When present it replaces the
/// service-wide email settings for that notification only, and travels
/// with it through the queue so retries reuse the same configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Envelope published to the delay queue: the notification snapshot plus
/// the optional email configuration override. The `retries` field inside
/// the snapshot is authoritative for retry scheduling; the database copy
/// is refreshed alongside status writes for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(flatten)]
    pub notification: Notification,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_config: Option<EmailConfig>,
}

impl QueueMessage {
    pub fn new(notification: Notification, email_config: Option<EmailConfig>) -> Self {
        Self {
            notification,
            email_config,
        }
    }

    pub fn encode(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("failed to encode queue message: {e}"))
        })
    }

    /// Decoding failures abort processing of the current message without
    /// touching any state; the worker rejects such messages.
    pub fn decode(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidMessage(format!("failed to decode queue message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_notification() -> Notification {
        Notification {
            id: "9f8b4a2e-3f70-4f25-9c2e-2d1a9f6f2a11".to_string(),
            payload: "hello".to_string(),
            created_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            status: NotificationStatus::Pending,
            scheduled_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 1).unwrap(),
            sender_id: "s".to_string(),
            recipient_id: "u1".to_string(),
            channel: Channel::Telegram,
            retries: 0,
        }
    }

    #[test]
    fn queue_message_round_trip_without_email_config() {
        let message = QueueMessage::new(sample_notification(), None);

        let body = message.encode().unwrap();
        let decoded = QueueMessage::decode(&body).unwrap();

        assert_eq!(decoded.notification.id, message.notification.id);
        assert_eq!(decoded.notification.retries, 0);
        assert_eq!(decoded.notification.channel, Channel::Telegram);
        assert!(decoded.email_config.is_none());

        // The wire format must not advertise an absent override.
        let text = String::from_utf8(body).unwrap();
        assert!(!text.contains("email_config"));
    }

    #[test]
    fn queue_message_carries_email_config() {
        let config = EmailConfig {
            subject: "Greetings".to_string(),
            from_email: "noreply@example.com".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            username: "user".to_string(),
            password: "pass".to_string(),
            ..Default::default()
        };
        let message = QueueMessage::new(sample_notification(), Some(config.clone()));

        let body = message.encode().unwrap();
        let decoded = QueueMessage::decode(&body).unwrap();

        assert_eq!(decoded.email_config, Some(config));
    }

    #[test]
    fn queue_message_uses_original_field_names() {
        let body = QueueMessage::new(sample_notification(), None).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(value.get("date_created").is_some());
        assert!(value.get("notification_date").is_some());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["channel"], "telegram");
    }

    #[test]
    fn decode_rejects_malformed_body() {
        let err = QueueMessage::decode(b"{not json").unwrap_err();
        assert!(matches!(err, AppError::InvalidMessage(_)));
    }

    #[test]
    fn status_parse_round_trip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
            NotificationStatus::Cancelled,
        ] {
            assert_eq!(NotificationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(NotificationStatus::parse("unknown").is_err());
    }
}
