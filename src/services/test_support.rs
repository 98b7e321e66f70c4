//! In-memory doubles for the service seams, used by unit tests only.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::StatusCache;
use crate::db::models::{Channel, EmailConfig, Notification, NotificationStatus};
use crate::db::repository::NotificationStore;
use crate::error::{AppError, AppResult};
use crate::queue::QueuePublisher;
use crate::senders::{ChannelSender, SenderResolver};

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("notification {} not found", id))
}

#[derive(Default)]
pub struct InMemoryStore {
    notifications: Mutex<HashMap<String, Notification>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.notifications.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.notifications.lock().unwrap().remove(id);
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn store(&self, notification: &Notification) -> AppResult<()> {
        self.notifications
            .lock()
            .unwrap()
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn load_by_id(&self, id: &str) -> AppResult<Notification> {
        self.get(id).ok_or_else(|| not_found(id))
    }

    async fn load_status_by_id(&self, id: &str) -> AppResult<NotificationStatus> {
        self.get(id).map(|n| n.status).ok_or_else(|| not_found(id))
    }

    async fn update_status_by_id(
        &self,
        id: &str,
        status: NotificationStatus,
        retries: i32,
    ) -> AppResult<Notification> {
        let mut notifications = self.notifications.lock().unwrap();
        let notification = notifications.get_mut(id).ok_or_else(|| not_found(id))?;
        notification.status = status;
        notification.retries = retries;
        Ok(notification.clone())
    }

    async fn cancel_by_id(&self, id: &str) -> AppResult<()> {
        let mut notifications = self.notifications.lock().unwrap();
        let notification = notifications.get_mut(id).ok_or_else(|| not_found(id))?;
        notification.status = NotificationStatus::Cancelled;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    storage: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.storage.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.storage
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn clear(&self) {
        self.storage.lock().unwrap().clear();
    }
}

#[async_trait]
impl StatusCache for InMemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> AppResult<()> {
        self.insert(key, value);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub content_type: String,
    /// `None` for immediate publishes.
    pub delay: Option<Duration>,
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl QueuePublisher for RecordingPublisher {
    async fn publish(&self, body: &[u8], routing_key: &str, content_type: &str) -> AppResult<()> {
        self.published.lock().unwrap().push(PublishedMessage {
            body: body.to_vec(),
            routing_key: routing_key.to_string(),
            content_type: content_type.to_string(),
            delay: None,
        });
        Ok(())
    }

    async fn publish_delayed(
        &self,
        body: &[u8],
        routing_key: &str,
        content_type: &str,
        delay: Duration,
    ) -> AppResult<()> {
        self.published.lock().unwrap().push(PublishedMessage {
            body: body.to_vec(),
            routing_key: routing_key.to_string(),
            content_type: content_type.to_string(),
            delay: Some(delay),
        });
        Ok(())
    }
}

/// Sender whose outcomes are scripted per call; once the script runs out,
/// every further call succeeds.
#[derive(Default, Debug)]
pub struct ScriptedSender {
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    calls: AtomicUsize,
}

impl ScriptedSender {
    pub fn always_ok() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), String>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    async fn send(&self, _notification: &Notification) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.lock().unwrap().pop_front() {
            Some(Ok(())) | None => Ok(()),
            Some(Err(message)) => Err(AppError::Telegram(message)),
        }
    }
}

/// Registry double that records every override-bound construction.
#[derive(Default)]
pub struct StubResolver {
    telegram: Option<Arc<ScriptedSender>>,
    email: Option<Arc<ScriptedSender>>,
    email_configs: Mutex<Vec<EmailConfig>>,
}

impl StubResolver {
    pub fn with_telegram(sender: Arc<ScriptedSender>) -> Self {
        Self {
            telegram: Some(sender),
            ..Default::default()
        }
    }

    pub fn with_email(sender: Arc<ScriptedSender>) -> Self {
        Self {
            email: Some(sender),
            ..Default::default()
        }
    }

    pub fn recorded_email_configs(&self) -> Vec<EmailConfig> {
        self.email_configs.lock().unwrap().clone()
    }
}

impl SenderResolver for StubResolver {
    fn sender_for(&self, channel: Channel) -> AppResult<Arc<dyn ChannelSender>> {
        let sender = match channel {
            Channel::Telegram => self.telegram.clone(),
            Channel::Email => self.email.clone(),
        };

        sender
            .map(|s| s as Arc<dyn ChannelSender>)
            .ok_or_else(|| AppError::Config(format!("{} sender not configured", channel.as_str())))
    }

    fn email_sender_with_config(&self, config: &EmailConfig) -> AppResult<Arc<dyn ChannelSender>> {
        self.email_configs.lock().unwrap().push(config.clone());

        self.email
            .clone()
            .map(|s| s as Arc<dyn ChannelSender>)
            .ok_or_else(|| AppError::Config("email sender not configured".to_string()))
    }
}
