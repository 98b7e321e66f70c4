use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::{QueueConfig, WorkerConfig};
use crate::error::{AppError, AppResult};
use crate::queue::RetryStrategy;
use crate::services::notifier::NotifierService;

/// Runs the consuming side of the pipeline: one consumer task pulls
/// deliveries off the queue into a shared channel, and N workers drain it
/// concurrently, each handing the body to the notifier service.
///
/// Shutdown is cooperative: the broadcast signal stops the consumer,
/// workers finish their current message and exit, and `stop` joins every
/// task. A message being processed during shutdown stays unacknowledged
/// and is redelivered.
pub struct WorkerManager {
    channel: Channel,
    queue_name: String,
    worker_count: usize,
    process_timeout: Duration,
    consume_retry: RetryStrategy,
    service: Arc<NotifierService>,
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new(
        channel: Channel,
        queue_config: &QueueConfig,
        worker_config: &WorkerConfig,
        consume_retry: RetryStrategy,
        service: Arc<NotifierService>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            channel,
            queue_name: queue_config.queue_name.clone(),
            worker_count: worker_config.count,
            process_timeout: worker_config.process_timeout(),
            consume_retry,
            service,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> AppResult<()> {
        self.channel
            .basic_qos(self.worker_count as u16, BasicQosOptions::default())
            .await?;

        let consumer = self.create_consumer().await?;

        let (tx, rx) = mpsc::channel::<Delivery>(self.worker_count * 2);
        let rx = Arc::new(Mutex::new(rx));

        self.handles.push(tokio::spawn(consumer_loop(
            consumer,
            tx,
            self.shutdown.subscribe(),
        )));

        for worker_id in 0..self.worker_count {
            self.handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx.clone(),
                self.service.clone(),
                self.process_timeout,
                self.shutdown.subscribe(),
            )));
        }

        tracing::info!(workers = self.worker_count, "Started notification workers");

        Ok(())
    }

    /// Signals shutdown and blocks until the consumer and every worker
    /// have exited.
    pub async fn stop(&mut self) {
        tracing::info!("Stopping notification workers");

        let _ = self.shutdown.send(());

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Worker task join failed: {}", e);
            }
        }

        tracing::info!("All workers stopped");
    }

    async fn create_consumer(&self) -> AppResult<Consumer> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match self
                .channel
                .basic_consume(
                    &self.queue_name,
                    "delayed-notifier",
                    BasicConsumeOptions {
                        no_ack: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => {
                    tracing::info!(queue = %self.queue_name, "Consumer started");
                    return Ok(consumer);
                }
                Err(e) if attempt < self.consume_retry.attempts => {
                    let backoff = self.consume_retry.delay_before_retry(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        "Failed to start consumer, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start consumer");
                    return Err(e.into());
                }
            }
        }
    }
}

async fn consumer_loop(
    mut consumer: Consumer,
    tx: mpsc::Sender<Delivery>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Consumer received shutdown signal");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    if tx.send(delivery).await.is_err() {
                        tracing::warn!("Worker channel closed, stopping consumer");
                        break;
                    }
                }
                Some(Err(e)) => {
                    // The connection is gone; the process should be
                    // restarted externally.
                    tracing::error!("Consumer error: {}", e);
                    break;
                }
                None => {
                    tracing::warn!("Consumer stream ended");
                    break;
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    service: Arc<NotifierService>,
    process_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::debug!(worker_id = worker_id, "Worker started");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(worker_id = worker_id, "Worker stopped");
                return;
            }
            delivery = async { rx.lock().await.recv().await } => match delivery {
                Some(delivery) => delivery,
                None => {
                    tracing::debug!(worker_id = worker_id, "Message channel closed");
                    return;
                }
            }
        };

        process_delivery(worker_id, &service, process_timeout, delivery).await;
    }
}

async fn process_delivery(
    worker_id: usize,
    service: &NotifierService,
    process_timeout: Duration,
    delivery: Delivery,
) {
    tracing::debug!(
        worker_id = worker_id,
        bytes = delivery.data.len(),
        "Processing message in worker"
    );

    let outcome = tokio::time::timeout(process_timeout, service.process(&delivery.data)).await;

    match outcome {
        Ok(Ok(())) => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                tracing::warn!(worker_id = worker_id, "Failed to ack message: {}", e);
            }
        }
        Ok(Err(AppError::InvalidMessage(e))) => {
            // Undecodable body: a redelivery would fail identically, so the
            // message is dropped instead of requeued.
            tracing::error!(worker_id = worker_id, "Rejecting malformed message: {}", e);
            if let Err(e) = delivery
                .reject(BasicRejectOptions { requeue: false })
                .await
            {
                tracing::warn!(worker_id = worker_id, "Failed to reject message: {}", e);
            }
        }
        Ok(Err(e)) => {
            tracing::warn!(
                worker_id = worker_id,
                "Message processing failed, requeueing: {}",
                e
            );
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
            {
                tracing::warn!(worker_id = worker_id, "Failed to nack message: {}", e);
            }
        }
        Err(_) => {
            tracing::warn!(
                worker_id = worker_id,
                timeout_ms = process_timeout.as_millis() as u64,
                "Message processing timed out, requeueing"
            );
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
            {
                tracing::warn!(worker_id = worker_id, "Failed to nack message: {}", e);
            }
        }
    }
}
