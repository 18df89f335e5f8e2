//! Resilient broker client.
//!
//! Owns the single connection/channel pair, health-checks it from one
//! dedicated task and drives bounded reconnection. Components that hold
//! broker-side state (consumers) register as [`ConnectionClient`]s and are
//! told to resubscribe after every successful reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::consumer::{Consumer, ConsumerOptions, MessageProcessor};
use super::envelope::{Envelope, ExchangeKey, ExchangeName, PublishConfig, QueueName};
use super::handles::{Exchange, Queue};
use super::transport::{Channel, Connection, Connector};
use crate::error::{MqError, MqResult};
use crate::shutdown::Shutdown;

/// Upper bound on reconnection attempts after a connection loss.
pub const RECONNECTION_ATTEMPTS: usize = 5;

/// Fixed wait before each reconnection attempt.
pub const RECONNECTION_BACKOFF: Duration = Duration::from_secs(30);

/// Default health-check polling interval.
pub const DEFAULT_CONN_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// A component that must re-establish broker state after a reconnect.
#[async_trait]
pub trait ConnectionClient: Send + Sync {
    /// Label used in logs.
    fn describe(&self) -> String;

    async fn reconnect(&self, shutdown: Shutdown) -> MqResult<()>;
}

/// Lifecycle of the broker link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Released on shutdown. Terminal.
    Closed,
    /// Reconnection attempts exhausted. Terminal.
    Failed,
}

/// Client construction options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How often the listener polls connection health.
    pub conn_check_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            conn_check_interval: DEFAULT_CONN_CHECK_INTERVAL,
        }
    }
}

impl ClientOptions {
    /// Set the health-check polling interval.
    pub fn with_conn_check_interval(mut self, interval: Duration) -> Self {
        self.conn_check_interval = interval;
        self
    }
}

/// One connection and the channel opened on it. Replaced wholesale.
struct Link {
    connection: Arc<dyn Connection>,
    channel: Arc<dyn Channel>,
}

/// Broker client shared by every publisher and consumer.
pub struct Client {
    url: String,
    connector: Arc<dyn Connector>,
    link: RwLock<Arc<Link>>,
    conn_clients: RwLock<Vec<Arc<dyn ConnectionClient>>>,
    state: watch::Sender<ConnectionState>,
    options: ClientOptions,
}

impl Client {
    /// Dial the broker and open a channel. No retry is attempted here.
    pub async fn connect(
        url: &str,
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> MqResult<Arc<Self>> {
        let link = dial(connector.as_ref(), url).await?;
        let (state, _) = watch::channel(ConnectionState::Connected);

        Ok(Arc::new(Self {
            url: url.to_string(),
            connector,
            link: RwLock::new(Arc::new(link)),
            conn_clients: RwLock::new(Vec::new()),
            state,
            options,
        }))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Release the channel and connection.
    ///
    /// Channel close failures are only logged; connection close failures are
    /// returned.
    pub async fn close(&self) -> MqResult<()> {
        let link = self.snapshot().await;
        self.set_state(ConnectionState::Closed);

        if let Err(e) = link.channel.close().await {
            error!(error = %e, "Close amqp channel error");
        }

        if !link.connection.is_closed() {
            link.connection.close().await?;
        }

        Ok(())
    }

    pub fn init_queue(self: &Arc<Self>, name: impl Into<QueueName>) -> Queue {
        Queue::new(name.into(), Arc::clone(self))
    }

    pub fn init_exchange(self: &Arc<Self>, name: impl Into<ExchangeName>) -> Exchange {
        Exchange::new(name.into(), Arc::clone(self))
    }

    pub fn init_consumer(
        self: &Arc<Self>,
        queue: impl Into<QueueName>,
        options: ConsumerOptions,
        processor: Arc<dyn MessageProcessor>,
    ) -> Arc<Consumer> {
        Arc::new(Consumer::new(
            queue.into(),
            Arc::downgrade(self),
            options,
            processor,
        ))
    }

    /// Start consumers in order, registering each for reconnect
    /// notification only after its own start succeeded.
    ///
    /// Stops at the first failure. Consumers started before it stay running
    /// and registered; nothing is rolled back.
    pub async fn start_consumers(
        &self,
        shutdown: &Shutdown,
        consumers: &[Arc<Consumer>],
    ) -> MqResult<()> {
        for consumer in consumers {
            consumer.start(shutdown.clone()).await?;
            self.add_connection_client(Arc::clone(consumer) as Arc<dyn ConnectionClient>)
                .await;
        }

        Ok(())
    }

    /// Append to the reconnect registry. No deduplication.
    pub async fn add_connection_client(&self, client: Arc<dyn ConnectionClient>) {
        self.conn_clients.write().await.push(client);
    }

    /// Number of registered connection clients.
    pub async fn connection_client_count(&self) -> usize {
        self.conn_clients.read().await.len()
    }

    /// Spawn [`Client::listen_connection`] on its own task.
    pub fn listen_connection_async(self: &Arc<Self>, shutdown: Shutdown) -> JoinHandle<MqResult<()>> {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.listen_connection(shutdown).await })
    }

    /// Poll connection health until shutdown, reconnecting when it drops.
    ///
    /// Returns `Ok` after closing the client on shutdown and an error when
    /// reconnection is exhausted.
    pub async fn listen_connection(&self, mut shutdown: Shutdown) -> MqResult<()> {
        loop {
            if shutdown.is_shutdown() {
                return self.close().await;
            }

            if let Err(e) = self.check_connection(&mut shutdown).await {
                self.set_state(ConnectionState::Failed);
                return Err(e);
            }

            shutdown.sleep(self.options.conn_check_interval).await;
        }
    }

    async fn check_connection(&self, shutdown: &mut Shutdown) -> MqResult<()> {
        if !self.snapshot().await.connection.is_closed() {
            return Ok(());
        }

        warn!("MQ connection lost");
        self.set_state(ConnectionState::Disconnected);

        for attempt in 1..=RECONNECTION_ATTEMPTS {
            if !shutdown.sleep(RECONNECTION_BACKOFF).await {
                return Ok(());
            }

            self.set_state(ConnectionState::Reconnecting);
            info!(attempt, "Connecting to MQ...");

            if let Err(e) = self.reconnect().await {
                error!(attempt, error = %e, "Reconnect failed");
                continue;
            }

            self.notify_connection_clients(shutdown).await;
            self.set_state(ConnectionState::Connected);

            info!("MQ connection established");
            return Ok(());
        }

        Err(MqError::ReconnectionExhausted {
            attempts: RECONNECTION_ATTEMPTS,
        })
    }

    /// Dial a fresh link and swap it in with a single exclusive write. The
    /// state stays `Reconnecting` until every connection client was notified.
    async fn reconnect(&self) -> MqResult<()> {
        let link = dial(self.connector.as_ref(), &self.url).await?;
        *self.link.write().await = Arc::new(link);
        Ok(())
    }

    async fn notify_connection_clients(&self, shutdown: &Shutdown) {
        let clients = self.conn_clients.read().await.clone();

        for client in clients {
            if let Err(e) = client.reconnect(shutdown.clone()).await {
                error!(client = %client.describe(), error = %e, "Reconnect for connection client failed");
            }
        }
    }

    /// The channel of the current link.
    pub(crate) async fn channel(&self) -> Arc<dyn Channel> {
        Arc::clone(&self.snapshot().await.channel)
    }

    async fn snapshot(&self) -> Arc<Link> {
        Arc::clone(&*self.link.read().await)
    }

    pub async fn publish(
        &self,
        exchange: &ExchangeName,
        key: &ExchangeKey,
        body: impl Into<Vec<u8>>,
    ) -> MqResult<()> {
        self.publish_with_config(exchange, key, body, PublishConfig::default())
            .await
    }

    /// Publish durably. Transport errors are returned, never retried here.
    #[instrument(skip(self, body, config), fields(exchange = %exchange, key = %key))]
    pub async fn publish_with_config(
        &self,
        exchange: &ExchangeName,
        key: &ExchangeKey,
        body: impl Into<Vec<u8>>,
        config: PublishConfig,
    ) -> MqResult<()> {
        let envelope = Envelope::persistent(body, config);
        self.channel().await.publish(exchange, key, &envelope).await
    }
}

async fn dial(connector: &dyn Connector, url: &str) -> MqResult<Link> {
    let connection = connector.connect(url).await?;
    let channel = connection.open_channel().await?;
    Ok(Link {
        connection,
        channel,
    })
}
