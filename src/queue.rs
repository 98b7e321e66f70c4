use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::AppResult;

/// Publishes notification envelopes onto the delay queue.
///
/// Delays are a floor, not a ceiling: a message published with delay `d`
/// becomes visible to consumers no earlier than `now + d`.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, body: &[u8], routing_key: &str, content_type: &str) -> AppResult<()>;

    async fn publish_delayed(
        &self,
        body: &[u8],
        routing_key: &str,
        content_type: &str,
        delay: Duration,
    ) -> AppResult<()>;
}

/// Bounded retry plan for transient broker failures: `attempts` tries,
/// starting at `delay` and multiplying by `backoff` between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: u32,
}

impl RetryStrategy {
    pub fn publisher(config: &RetryConfig) -> Self {
        Self {
            attempts: config.publisher_attempts,
            delay: Duration::from_millis(config.publisher_delay_ms),
            backoff: config.publisher_backoff,
        }
    }

    pub fn consumer(config: &RetryConfig) -> Self {
        Self {
            attempts: config.consumer_attempts,
            delay: Duration::from_millis(config.consumer_delay_ms),
            backoff: config.consumer_backoff,
        }
    }

    /// Sleep duration before the attempt following `failed_attempts`
    /// failures (the first failure is attempt 1).
    pub fn delay_before_retry(&self, failed_attempts: u32) -> Duration {
        let multiplier = self.backoff.max(1).saturating_pow(failed_attempts.saturating_sub(1));
        self.delay.saturating_mul(multiplier)
    }
}

/// AMQP publisher bound to a delayed-message exchange. Delayed publishes
/// carry the delay in the `x-delay` header, honored by the broker's
/// `x-delayed-message` exchange plugin.
pub struct RabbitPublisher {
    channel: Channel,
    exchange: String,
    strategy: RetryStrategy,
}

impl RabbitPublisher {
    pub fn new(channel: Channel, exchange: String, strategy: RetryStrategy) -> Self {
        Self {
            channel,
            exchange,
            strategy,
        }
    }

    async fn publish_with_retry(
        &self,
        body: &[u8],
        routing_key: &str,
        content_type: &str,
        headers: FieldTable,
    ) -> AppResult<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let properties = BasicProperties::default()
                .with_content_type(content_type.into())
                .with_delivery_mode(2) // persistent
                .with_headers(headers.clone());

            let result = async {
                self.channel
                    .basic_publish(
                        &self.exchange,
                        routing_key,
                        BasicPublishOptions::default(),
                        body,
                        properties,
                    )
                    .await?
                    .await?;
                Ok::<_, lapin::Error>(())
            }
            .await;

            match result {
                Ok(()) => {
                    debug!(
                        exchange = %self.exchange,
                        routing_key = %routing_key,
                        "Message published"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.strategy.attempts => {
                    let backoff = self.strategy.delay_before_retry(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt, "Publish failed, giving up");
                    return Err(e.into());
                }
            }
        }
    }
}

#[async_trait]
impl QueuePublisher for RabbitPublisher {
    async fn publish(&self, body: &[u8], routing_key: &str, content_type: &str) -> AppResult<()> {
        self.publish_with_retry(body, routing_key, content_type, FieldTable::default())
            .await
    }

    async fn publish_delayed(
        &self,
        body: &[u8],
        routing_key: &str,
        content_type: &str,
        delay: Duration,
    ) -> AppResult<()> {
        let mut headers = FieldTable::default();
        headers.insert(
            "x-delay".into(),
            AMQPValue::LongLongInt(delay.as_millis() as i64),
        );

        self.publish_with_retry(body, routing_key, content_type, headers)
            .await
    }
}

/// Declares the delayed exchange, the durable queue and the binding
/// between them. Idempotent; run once at startup.
pub async fn setup_topology(
    channel: &Channel,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
) -> AppResult<()> {
    let mut exchange_args = FieldTable::default();
    exchange_args.insert(
        "x-delayed-type".into(),
        AMQPValue::LongString("direct".into()),
    );

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Custom("x-delayed-message".to_string()),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            exchange_args,
        )
        .await?;

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            queue_name,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(
        exchange = %exchange,
        queue = %queue_name,
        "Queue topology declared"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_strategy_backoff_grows_multiplicatively() {
        let strategy = RetryStrategy {
            attempts: 4,
            delay: Duration::from_millis(100),
            backoff: 2,
        };

        assert_eq!(strategy.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_before_retry(2), Duration::from_millis(200));
        assert_eq!(strategy.delay_before_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_strategy_tolerates_zero_backoff() {
        let strategy = RetryStrategy {
            attempts: 3,
            delay: Duration::from_millis(50),
            backoff: 0,
        };

        // A zero multiplier would collapse every delay; clamp to constant.
        assert_eq!(strategy.delay_before_retry(3), Duration::from_millis(50));
    }
}
