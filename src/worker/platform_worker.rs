//! Per-blockchain bridge from the block log to the shared exchange.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::Worker;
use crate::messaging::{Exchange, ExchangeKey, LogReader, LogRecord};
use crate::metrics::ConsumerMetrics;
use crate::platform::Coin;
use crate::shutdown::Shutdown;

/// Pause between fetch attempts, and after a fetch is abandoned.
pub const DEFAULT_FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause between publish attempts of the same record.
pub const DEFAULT_PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Reads one coin's block topic and republishes every record to the shared
/// exchange with the coin handle as routing key.
pub struct PlatformWorker {
    name: String,
    coin: Coin,
    key: ExchangeKey,
    exchange: Exchange,
    reader: Box<dyn LogReader>,
    metrics: Arc<dyn ConsumerMetrics>,
    max_attempts: usize,
    fetch_retry_delay: Duration,
    publish_retry_delay: Duration,
}

impl PlatformWorker {
    pub fn new(
        coin: Coin,
        exchange: Exchange,
        reader: Box<dyn LogReader>,
        metrics: Arc<dyn ConsumerMetrics>,
        max_attempts: usize,
    ) -> Self {
        Self {
            name: format!("{}-block-consumer", coin.handle),
            coin,
            key: ExchangeKey::new(coin.handle),
            exchange,
            reader,
            metrics,
            max_attempts: max_attempts.max(1),
            fetch_retry_delay: DEFAULT_FETCH_RETRY_DELAY,
            publish_retry_delay: DEFAULT_PUBLISH_RETRY_DELAY,
        }
    }

    pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }

    pub fn with_publish_retry_delay(mut self, delay: Duration) -> Self {
        self.publish_retry_delay = delay;
        self
    }

    pub fn coin(&self) -> &Coin {
        &self.coin
    }

    pub fn topic(&self) -> &str {
        self.reader.topic()
    }

    /// Next record, or `None` once every attempt failed or shutdown
    /// interrupted the retry pause.
    async fn fetch(&self, timer: &mut Shutdown) -> Option<LogRecord> {
        for attempt in 1..=self.max_attempts {
            match self.reader.fetch().await {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(
                        coin = %self.coin.handle,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Fetch block failed"
                    );
                    if !timer.sleep(self.fetch_retry_delay).await {
                        return None;
                    }
                }
            }
        }

        error!(coin = %self.coin.handle, "Fetch block abandoned after all attempts");
        self.metrics.record_fetch_failure(self.coin.handle);
        None
    }

    /// Publish `record` until it succeeds, then commit its offset.
    ///
    /// The next record is not fetched before this one is published, so a
    /// later commit never skips it. Returns early without committing when
    /// shutdown interrupts the retry pause.
    async fn forward(&self, record: LogRecord, timer: &mut Shutdown) {
        let offset = record.offset;

        let mut attempt = 1u32;
        while let Err(e) = self.exchange.publish(&self.key, record.payload.clone()).await {
            error!(coin = %self.coin.handle, offset, attempt, error = %e, "Publish block failed");
            self.metrics.record_publish_failure(self.coin.handle);

            if !timer.sleep(self.publish_retry_delay).await {
                warn!(coin = %self.coin.handle, offset, "Shutdown before block was published");
                return;
            }
            attempt += 1;
        }

        self.metrics.record_block_consumed(self.coin.handle);
        debug!(coin = %self.coin.handle, offset, "Block forwarded");

        if let Err(e) = self.reader.commit(&record).await {
            warn!(coin = %self.coin.handle, offset, error = %e, "Commit offset failed");
        }
    }
}

#[async_trait]
impl Worker for PlatformWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut shutdown: Shutdown) {
        info!(coin = %self.coin.handle, topic = %self.reader.topic(), "Block consumer started");

        let mut retry_timer = shutdown.clone();
        loop {
            let record = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                record = self.fetch(&mut retry_timer) => record,
            };

            if let Some(record) = record {
                self.forward(record, &mut retry_timer).await;
            }
        }

        if let Err(e) = self.reader.close().await {
            warn!(coin = %self.coin.handle, error = %e, "Close log reader failed");
        }
        info!(coin = %self.coin.handle, "Block consumer stopped");
    }
}
