use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::db::models::Channel;
use crate::error::{AppError, AppResult};
use crate::services::notifier::CreateNotificationRequest;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

/// Shape checks applied at the HTTP boundary. The scheduling core itself
/// accepts anything that decodes; in particular, past delivery instants
/// are only rejected here.
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    pub fn validate_create_request(&self, req: &CreateNotificationRequest) -> AppResult<()> {
        if req.payload.trim().is_empty() {
            return Err(AppError::Validation("payload cannot be empty".to_string()));
        }

        if req.recipient_id.trim().is_empty() {
            return Err(AppError::Validation(
                "recipient_id cannot be empty".to_string(),
            ));
        }

        if req.channel == Channel::Email && !is_valid_email(req.recipient_id.trim()) {
            return Err(AppError::Validation("invalid email format".to_string()));
        }

        if req.notification_date < Utc::now() {
            return Err(AppError::Validation(
                "notification_date cannot be in the past".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_notification_id(&self, id: &str) -> AppResult<()> {
        if id.trim().is_empty() {
            return Err(AppError::Validation(
                "notification_id cannot be empty".to_string(),
            ));
        }

        if Uuid::parse_str(id).is_err() {
            return Err(AppError::Validation("invalid UUID format".to_string()));
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_valid_email(email: &str) -> bool {
    if !EMAIL_REGEX.is_match(email) {
        return false;
    }

    if email.contains("..") {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(_local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    // minimum "a.b"
    domain.len() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::db::models::EmailConfig;

    fn valid_request() -> CreateNotificationRequest {
        CreateNotificationRequest {
            payload: "hello".to_string(),
            notification_date: Utc::now() + Duration::hours(1),
            sender_id: "sender".to_string(),
            recipient_id: "12345".to_string(),
            channel: Channel::Telegram,
            email_config: None,
        }
    }

    #[test]
    fn accepts_valid_telegram_request() {
        let validator = Validator::new();
        assert!(validator.validate_create_request(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_empty_payload() {
        let validator = Validator::new();
        let mut req = valid_request();
        req.payload = "   ".to_string();
        assert!(matches!(
            validator.validate_create_request(&req),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn rejects_empty_recipient() {
        let validator = Validator::new();
        let mut req = valid_request();
        req.recipient_id = String::new();
        assert!(validator.validate_create_request(&req).is_err());
    }

    #[test]
    fn rejects_past_notification_date() {
        let validator = Validator::new();
        let mut req = valid_request();
        req.notification_date = Utc::now() - Duration::hours(1);
        assert!(validator.validate_create_request(&req).is_err());
    }

    #[test]
    fn email_channel_requires_valid_address() {
        let validator = Validator::new();
        let mut req = valid_request();
        req.channel = Channel::Email;
        req.recipient_id = "not-an-email".to_string();
        assert!(validator.validate_create_request(&req).is_err());

        req.recipient_id = "user@example.com".to_string();
        req.email_config = Some(EmailConfig::default());
        assert!(validator.validate_create_request(&req).is_ok());
    }

    #[test]
    fn email_format_checks() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("first.last+tag@sub.domain.org"));

        assert!(!is_valid_email("plainaddress"));
        assert!(!is_valid_email("user@@example.com"));
        assert!(!is_valid_email("user..double@example.com"));
        assert!(!is_valid_email("user@domain"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@.c"));
    }

    #[test]
    fn notification_id_must_be_uuid() {
        let validator = Validator::new();
        assert!(validator
            .validate_notification_id("9f8b4a2e-3f70-4f25-9c2e-2d1a9f6f2a11")
            .is_ok());
        assert!(validator.validate_notification_id("").is_err());
        assert!(validator.validate_notification_id("not-a-uuid").is_err());
    }
}
