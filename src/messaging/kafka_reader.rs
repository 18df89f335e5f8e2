//! Kafka reader for per-blockchain block topics.
//!
//! Every supported blockchain gets its own reader: topic
//! `<prefix><coin handle>`, consumer group `<coin handle>`, so offsets are
//! tracked independently per chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::error::{LogError, LogResult};
use crate::types::KafkaConfig;

/// One record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Oldest record still retained. Only applies before the group's first commit.
    Earliest,
    Latest,
}

impl StartOffset {
    fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

/// Reader settings for one blockchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub brokers: Vec<String>,
    /// Fetch attempts before a failure is logged and skipped.
    pub max_attempts: usize,
    pub topic: String,
    pub group_id: String,
    pub start_offset: StartOffset,
    /// Informational only. librdkafka has no per-consumer offset retention;
    /// the broker's `offsets.retention.minutes` decides how long commits live.
    pub retention_time: Duration,
}

impl ReaderConfig {
    /// Settings for the coin identified by `handle`.
    pub fn for_coin(kafka: &KafkaConfig, handle: &str) -> Self {
        Self {
            brokers: kafka.broker_list(),
            max_attempts: kafka.max_attempts.max(1),
            topic: format!("{}{}", kafka.blocks_topic_prefix, handle),
            group_id: handle.to_string(),
            start_offset: StartOffset::Earliest,
            retention_time: Duration::from_secs(kafka.retention_time_secs),
        }
    }
}

/// A subscription to one topic under one consumer group.
#[async_trait]
pub trait LogReader: Send + Sync {
    fn topic(&self) -> &str;

    /// Wait for the next record.
    async fn fetch(&self) -> LogResult<LogRecord>;

    /// Mark `record` as consumed for this consumer group.
    async fn commit(&self, record: &LogRecord) -> LogResult<()>;

    async fn close(&self) -> LogResult<()>;
}

/// Builds a reader from its settings.
pub trait LogReaderFactory: Send + Sync {
    fn create(&self, config: &ReaderConfig) -> LogResult<Box<dyn LogReader>>;
}

/// Creates [`KafkaLogReader`]s.
#[derive(Debug, Clone, Default)]
pub struct KafkaReaderFactory;

impl LogReaderFactory for KafkaReaderFactory {
    fn create(&self, config: &ReaderConfig) -> LogResult<Box<dyn LogReader>> {
        Ok(Box::new(KafkaLogReader::new(config)?))
    }
}

/// `rdkafka` backed reader. Offsets are committed manually.
pub struct KafkaLogReader {
    consumer: StreamConsumer,
    topic: String,
    closed: AtomicBool,
}

impl KafkaLogReader {
    /// Create the consumer and subscribe to the configured topic.
    pub fn new(config: &ReaderConfig) -> LogResult<Self> {
        let create_error = |e: rdkafka::error::KafkaError| LogError::Create {
            topic: config.topic.clone(),
            message: e.to_string(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("enable.auto.commit", "false")
            .create()
            .map_err(create_error)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(create_error)?;

        info!(
            topic = %config.topic,
            group = %config.group_id,
            retention_secs = config.retention_time.as_secs(),
            "Kafka reader created"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl LogReader for KafkaLogReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> LogResult<LogRecord> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed(self.topic.clone()));
        }

        let message = self.consumer.recv().await.map_err(|e| LogError::Fetch {
            topic: self.topic.clone(),
            message: e.to_string(),
        })?;

        Ok(LogRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&self, record: &LogRecord) -> LogResult<()> {
        let commit_error = |message: String| LogError::Commit {
            topic: record.topic.clone(),
            offset: record.offset,
            message,
        };

        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| commit_error(e.to_string()))?;

        self.consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| commit_error(e.to_string()))
    }

    async fn close(&self) -> LogResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.consumer.unsubscribe();
            debug!(topic = %self.topic, "Kafka reader closed");
        }
        Ok(())
    }
}
