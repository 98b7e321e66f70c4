use async_trait::async_trait;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::db::models::{EmailConfig, Notification};
use crate::error::{AppError, AppResult};
use crate::senders::ChannelSender;
use crate::validation::is_valid_email;

/// Port that expects an implicit-TLS session; every other port negotiates
/// STARTTLS.
const SMTP_PORT_SSL: u16 = 465;

const DEFAULT_SUBJECT: &str = "Notification";

const HTML_TEMPLATE: &str = r#"
<html>
<body>
    <h2>{subject}</h2>
    <p><strong>Message:</strong> {message}</p>
    <p><strong>Channel:</strong> {channel}</p>
    <p><strong>Date:</strong> {date}</p>
    <hr>
    <p><em>This is an automated message from the notification service.</em></p>
</body>
</html>
"#;

const TEXT_TEMPLATE: &str = r#"{subject}

Message: {message}
Channel: {channel}
Date: {date}

This is an automated message from the notification service.
"#;

/// Sends notification payloads over SMTP as multipart HTML + plain text.
///
/// Each sender is bound to one configuration; per-notification overrides
/// construct a fresh sender so retries of the same notification keep using
/// the override.
#[derive(Debug)]
pub struct EmailSender {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> AppResult<Self> {
        validate_email_config(&config)?;

        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = if config.smtp_port == SMTP_PORT_SSL {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| AppError::Config(format!("invalid SMTP relay: {e}")))?
                .port(config.smtp_port)
                .credentials(credentials)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Config(format!("invalid SMTP relay: {e}")))?
                .port(config.smtp_port)
                .credentials(credentials)
                .build()
        };

        Ok(Self { config, transport })
    }

    fn subject(&self) -> &str {
        if self.config.subject.is_empty() {
            DEFAULT_SUBJECT
        } else {
            &self.config.subject
        }
    }

    fn from_mailbox(&self) -> AppResult<Mailbox> {
        let raw = if self.config.from_name.is_empty() {
            self.config.from_email.clone()
        } else {
            format!("{} <{}>", self.config.from_name, self.config.from_email)
        };

        raw.parse::<Mailbox>()
            .map_err(|e| AppError::Config(format!("invalid from address: {e}")))
    }

    fn build_message(&self, notification: &Notification, to: Mailbox) -> AppResult<Message> {
        let subject = self.subject();
        let date = notification.scheduled_at.to_rfc3339();

        let html_body = render_template(HTML_TEMPLATE, subject, notification, &date);
        let text_body = render_template(TEXT_TEMPLATE, subject, notification, &date);

        Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::Email(format!("failed to build email: {e}")))
    }
}

fn render_template(template: &str, subject: &str, notification: &Notification, date: &str) -> String {
    template
        .replace("{subject}", subject)
        .replace("{message}", &notification.payload)
        .replace("{channel}", notification.channel.as_str())
        .replace("{date}", date)
}

fn validate_email_config(config: &EmailConfig) -> AppResult<()> {
    if config.smtp_host.is_empty() {
        return Err(AppError::Config("SMTP host is required".to_string()));
    }
    if config.smtp_port == 0 {
        return Err(AppError::Config("SMTP port is required".to_string()));
    }
    if config.username.is_empty() {
        return Err(AppError::Config("SMTP username is required".to_string()));
    }
    if config.password.is_empty() {
        return Err(AppError::Config("SMTP password is required".to_string()));
    }
    if config.from_email.is_empty() {
        return Err(AppError::Config("from email is required".to_string()));
    }
    if !is_valid_email(&config.from_email) {
        return Err(AppError::Config(format!(
            "invalid from email address: {}",
            config.from_email
        )));
    }
    Ok(())
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(&self, notification: &Notification) -> AppResult<()> {
        let recipient = notification.recipient_id.trim();
        if !is_valid_email(recipient) {
            return Err(AppError::Email(format!(
                "invalid recipient email address: {recipient}"
            )));
        }

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AppError::Email(format!("invalid recipient email: {e}")))?;

        let message = self.build_message(notification, to)?;

        tracing::info!(
            id = %notification.id,
            recipient = %recipient,
            smtp_host = %self.config.smtp_host,
            subject = %self.subject(),
            "Sending email notification"
        );

        match self.transport.send(message).await {
            Ok(_) => {
                tracing::info!(id = %notification.id, recipient = %recipient, "Email notification sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(id = %notification.id, recipient = %recipient, "Failed to send email: {}", e);
                Err(AppError::Email(format!("failed to send email: {e}")))
            }
        }
    }
}
