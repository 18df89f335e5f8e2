//! Queue consumer with reconnect support.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::{Client, ConnectionClient};
use super::envelope::{ExchangeKey, ExchangeName, PublishConfig, QueueName};
use super::transport::{Delivery, DeliveryStream};
use crate::error::{MqError, MqResult};
use crate::shutdown::Shutdown;

/// What to do with a delivery once it has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Done; remove from the queue.
    Ack,
    /// Reject without redelivery.
    Nack,
    /// Republish with one less remaining retry, dropping it at zero.
    Requeue,
}

/// Per-message processing capability.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, delivery: &Delivery) -> ProcessOutcome;
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Prefix of the broker consumer tag; a random suffix is added per subscription.
    pub tag_prefix: String,
    /// Unacknowledged deliveries the broker may push at once.
    pub prefetch_count: u16,
    /// Retries granted to messages that arrive without a remaining-retries header.
    pub retry_limit: Option<u32>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            tag_prefix: "block-consumer".to_string(),
            prefetch_count: 10,
            retry_limit: None,
        }
    }
}

impl ConsumerOptions {
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }
}

/// Subscribes a [`MessageProcessor`] to a queue.
///
/// After a broker reconnect the old subscription is gone with its channel, so
/// [`ConnectionClient::reconnect`] subscribes again from scratch.
pub struct Consumer {
    queue: QueueName,
    client: Weak<Client>,
    options: ConsumerOptions,
    processor: Arc<dyn MessageProcessor>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    pub(crate) fn new(
        queue: QueueName,
        client: Weak<Client>,
        options: ConsumerOptions,
        processor: Arc<dyn MessageProcessor>,
    ) -> Self {
        Self {
            queue,
            client,
            options,
            processor,
            task: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Subscribe on the current channel and spawn the delivery loop.
    ///
    /// A loop left over from an earlier subscription is aborted.
    pub async fn start(&self, shutdown: Shutdown) -> MqResult<()> {
        let client = self.client.upgrade().ok_or(MqError::ClientDropped)?;
        let tag = format!("{}-{}", self.options.tag_prefix, Uuid::new_v4());

        let stream = client
            .channel()
            .await
            .consume(&self.queue, &tag, self.options.prefetch_count)
            .await?;

        let delivery_loop = DeliveryLoop {
            queue: self.queue.clone(),
            client: self.client.clone(),
            processor: Arc::clone(&self.processor),
            retry_limit: self.options.retry_limit,
        };
        let handle = tokio::spawn(delivery_loop.run(stream, shutdown));

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }

        info!(queue = %self.queue, tag = %tag, "Consumer started");
        Ok(())
    }

    /// Abort the delivery loop, if any.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ConnectionClient for Consumer {
    fn describe(&self) -> String {
        format!("consumer({})", self.queue)
    }

    async fn reconnect(&self, shutdown: Shutdown) -> MqResult<()> {
        self.start(shutdown).await
    }
}

struct DeliveryLoop {
    queue: QueueName,
    client: Weak<Client>,
    processor: Arc<dyn MessageProcessor>,
    retry_limit: Option<u32>,
}

impl DeliveryLoop {
    async fn run(self, mut stream: DeliveryStream, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(queue = %self.queue, "Consumer stopping");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.handle(delivery).await,
                    Some(Err(e)) => error!(queue = %self.queue, error = %e, "Consumer error"),
                    None => {
                        warn!(queue = %self.queue, "Delivery stream closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle(&self, delivery: Delivery) {
        debug!(queue = %self.queue, redelivered = delivery.redelivered(), "Delivery received");
        let result = match self.processor.process(&delivery).await {
            ProcessOutcome::Ack => delivery.ack().await,
            ProcessOutcome::Nack => delivery.nack(false).await,
            ProcessOutcome::Requeue => self.requeue(&delivery).await,
        };

        if let Err(e) = result {
            error!(queue = %self.queue, error = %e, "Failed to settle delivery");
        }
    }

    async fn requeue(&self, delivery: &Delivery) -> MqResult<()> {
        let remaining = delivery
            .remaining_retries()
            .or(self.retry_limit)
            .unwrap_or(0);

        if remaining == 0 {
            warn!(queue = %self.queue, "Retries exhausted, dropping message");
            return delivery.nack(false).await;
        }

        let Some(client) = self.client.upgrade() else {
            return delivery.nack(true).await;
        };

        let key = ExchangeKey::new(self.queue.as_str());
        let republished = client
            .publish_with_config(
                &ExchangeName::default(),
                &key,
                delivery.body().to_vec(),
                PublishConfig::with_max_retries(remaining - 1),
            )
            .await;

        match republished {
            Ok(()) => delivery.ack().await,
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Requeue publish failed, returning message to broker");
                delivery.nack(true).await
            }
        }
    }
}
