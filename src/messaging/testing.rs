//! In-memory broker for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::envelope::{Envelope, ExchangeKey, ExchangeName, QueueName};
use super::kafka_reader::{LogReader, LogReaderFactory, LogRecord, ReaderConfig};
use super::transport::{
    Acknowledger, Channel, Connection, Connector, Delivery, DeliveryStream, ExchangeKind,
};
use crate::error::{LogError, LogResult, MqError, MqResult};

/// A message captured by the broker.
#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub key: String,
    pub envelope: Envelope,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack { requeue: bool },
}

#[derive(Default)]
struct State {
    dials: usize,
    failing_dials: usize,
    closed: Vec<bool>,
    published: Vec<Published>,
    declarations: Vec<String>,
    subscribers: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    consume_counts: HashMap<String, usize>,
    failing_queues: Vec<String>,
    settlements: Vec<Settlement>,
    fail_channel_close: bool,
    fail_connection_close: bool,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<State>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn fail_next_dials(&self, count: usize) {
        self.state.lock().unwrap().failing_dials = count;
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().unwrap().dials
    }

    /// Kill every open connection and end every subscription.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed.iter_mut().for_each(|closed| *closed = true);
        state.subscribers.clear();
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn declarations(&self) -> Vec<String> {
        self.state.lock().unwrap().declarations.clone()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().unwrap().settlements.clone()
    }

    pub fn fail_consume(&self, queue: &str) {
        self.state.lock().unwrap().failing_queues.push(queue.to_string());
    }

    pub fn consume_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .consume_counts
            .get(queue)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_channel_close(&self, fail: bool) {
        self.state.lock().unwrap().fail_channel_close = fail;
    }

    pub fn fail_connection_close(&self, fail: bool) {
        self.state.lock().unwrap().fail_connection_close = fail;
    }

    /// Push a message to the latest subscription on `queue`.
    pub fn deliver(&self, queue: &str, body: &[u8], remaining_retries: Option<u32>) {
        self.push_delivery(queue, body, remaining_retries, false);
    }

    /// Push a message flagged as redelivered by the broker.
    pub fn redeliver(&self, queue: &str, body: &[u8]) {
        self.push_delivery(queue, body, None, true);
    }

    /// Whether the latest subscription on `queue` is still being read.
    pub fn has_live_subscriber(&self, queue: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .get(queue)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn push_delivery(&self, queue: &str, body: &[u8], remaining_retries: Option<u32>, redelivered: bool) {
        let state = self.state.lock().unwrap();
        let subscriber = state
            .subscribers
            .get(queue)
            .unwrap_or_else(|| panic!("no subscriber on {queue}"));
        let acker = Box::new(MockAcker {
            state: Arc::clone(&self.state),
        });
        subscriber
            .send(Delivery::new(body.to_vec(), remaining_retries, redelivered, acker))
            .unwrap();
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn connect(&self, _url: &str) -> MqResult<Arc<dyn Connection>> {
        let mut state = self.state.lock().unwrap();
        state.dials += 1;

        if state.failing_dials > 0 {
            state.failing_dials -= 1;
            return Err(MqError::Connection("connection refused".into()));
        }

        state.closed.push(false);
        Ok(Arc::new(MockConnection {
            id: state.closed.len() - 1,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockConnection {
    id: usize,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed[self.id]
    }

    async fn open_channel(&self) -> MqResult<Arc<dyn Channel>> {
        if self.is_closed() {
            return Err(MqError::Channel("connection is closed".into()));
        }
        Ok(Arc::new(MockChannel {
            connection: self.id,
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> MqResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connection_close {
            return Err(MqError::Close("broker refused close".into()));
        }
        state.closed[self.id] = true;
        Ok(())
    }
}

struct MockChannel {
    connection: usize,
    state: Arc<Mutex<State>>,
}

impl MockChannel {
    fn ensure_open(&self, state: &State) -> Result<(), String> {
        if state.closed[self.connection] {
            return Err("channel/connection is not open".to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(
        &self,
        exchange: &ExchangeName,
        key: &ExchangeKey,
        envelope: &Envelope,
    ) -> MqResult<()> {
        let mut state = self.state.lock().unwrap();
        self.ensure_open(&state).map_err(|message| MqError::Publish {
            exchange: exchange.to_string(),
            message,
        })?;

        state.published.push(Published {
            exchange: exchange.to_string(),
            key: key.to_string(),
            envelope: envelope.clone(),
        });
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        _consumer_tag: &str,
        _prefetch_count: u16,
    ) -> MqResult<DeliveryStream> {
        let mut state = self.state.lock().unwrap();
        let consume_error = |message: String| MqError::Consume {
            queue: queue.to_string(),
            message,
        };
        self.ensure_open(&state).map_err(consume_error)?;

        if state.failing_queues.iter().any(|q| q == queue.as_str()) {
            return Err(consume_error("NOT_FOUND - no queue".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.insert(queue.to_string(), tx);
        *state.consume_counts.entry(queue.to_string()).or_insert(0) += 1;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        });
        Ok(stream.boxed())
    }

    async fn declare_exchange(&self, exchange: &ExchangeName, kind: ExchangeKind) -> MqResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .declarations
            .push(format!("exchange:{}:{}", exchange, kind.as_str()));
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueName) -> MqResult<()> {
        let mut state = self.state.lock().unwrap();
        state.declarations.push(format!("queue:{queue}"));
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &QueueName,
        exchange: &ExchangeName,
        key: &ExchangeKey,
    ) -> MqResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .declarations
            .push(format!("bind:{queue}:{exchange}:{key}"));
        Ok(())
    }

    async fn close(&self) -> MqResult<()> {
        if self.state.lock().unwrap().fail_channel_close {
            return Err(MqError::Channel("channel already closed".into()));
        }
        Ok(())
    }
}

struct MockAcker {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Acknowledger for MockAcker {
    async fn ack(&self) -> MqResult<()> {
        self.state.lock().unwrap().settlements.push(Settlement::Ack);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> MqResult<()> {
        self.state
            .lock()
            .unwrap()
            .settlements
            .push(Settlement::Nack { requeue });
        Ok(())
    }
}

#[derive(Default)]
struct LogState {
    next_offset: i64,
    committed: Vec<i64>,
    closed: bool,
}

/// Producer side of an in-memory log topic.
#[derive(Clone)]
pub struct MemoryLog {
    topic: String,
    tx: mpsc::UnboundedSender<LogResult<LogRecord>>,
    state: Arc<Mutex<LogState>>,
}

impl MemoryLog {
    pub fn new(topic: &str) -> (Self, MemoryLogReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(LogState::default()));
        let log = Self {
            topic: topic.to_string(),
            tx,
            state: Arc::clone(&state),
        };
        let reader = MemoryLogReader {
            topic: topic.to_string(),
            rx: tokio::sync::Mutex::new(rx),
            state,
        };
        (log, reader)
    }

    pub fn push(&self, payload: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let record = LogRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset: state.next_offset,
            key: None,
            payload: payload.to_vec(),
        };
        state.next_offset += 1;
        self.tx.send(Ok(record)).unwrap();
    }

    /// Make the next fetch fail.
    pub fn fail_next_fetch(&self) {
        self.tx
            .send(Err(LogError::Fetch {
                topic: self.topic.clone(),
                message: "leader not available".into(),
            }))
            .unwrap();
    }

    /// Kill the subscription from the outside; every later fetch fails.
    pub fn terminate(&self) {
        self.state.lock().unwrap().closed = true;
        self.tx.send(Err(LogError::Closed(self.topic.clone()))).unwrap();
    }

    pub fn committed(&self) -> Vec<i64> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

pub struct MemoryLogReader {
    topic: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<LogResult<LogRecord>>>,
    state: Arc<Mutex<LogState>>,
}

#[async_trait]
impl LogReader for MemoryLogReader {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn fetch(&self) -> LogResult<LogRecord> {
        if self.state.lock().unwrap().closed {
            return Err(LogError::Closed(self.topic.clone()));
        }

        let next = self.rx.lock().await.recv().await;
        match next {
            Some(item) => item,
            None => futures::future::pending().await,
        }
    }

    async fn commit(&self, record: &LogRecord) -> LogResult<()> {
        self.state.lock().unwrap().committed.push(record.offset);
        Ok(())
    }

    async fn close(&self) -> LogResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out [`MemoryLogReader`]s and keeps their producer sides by topic.
#[derive(Default)]
pub struct MemoryReaderFactory {
    logs: Mutex<HashMap<String, MemoryLog>>,
    configs: Mutex<Vec<ReaderConfig>>,
}

impl MemoryReaderFactory {
    pub fn log(&self, topic: &str) -> MemoryLog {
        self.logs.lock().unwrap()[topic].clone()
    }

    pub fn configs(&self) -> Vec<ReaderConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl LogReaderFactory for MemoryReaderFactory {
    fn create(&self, config: &ReaderConfig) -> LogResult<Box<dyn LogReader>> {
        let (log, reader) = MemoryLog::new(&config.topic);
        self.logs.lock().unwrap().insert(config.topic.clone(), log);
        self.configs.lock().unwrap().push(config.clone());
        Ok(Box::new(reader))
    }
}

/// Counts metric calls per `(metric, coin)`.
#[derive(Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingMetrics {
    pub fn count(&self, metric: &str, coin: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, c)| *m == metric && c == coin)
            .count()
    }

    fn record(&self, metric: &'static str, coin: &str) {
        self.calls.lock().unwrap().push((metric, coin.to_string()));
    }
}

impl crate::metrics::ConsumerMetrics for RecordingMetrics {
    fn record_block_consumed(&self, coin: &str) {
        self.record("blocks_consumed", coin);
    }

    fn record_fetch_failure(&self, coin: &str) {
        self.record("fetch_failures", coin);
    }

    fn record_publish_failure(&self, coin: &str) {
        self.record("publish_failures", coin);
    }
}

/// Poll `condition` until it holds. Panics after a minute of (virtual) time.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..6000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
