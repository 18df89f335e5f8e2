//! Composition root: one broker client, one shared exchange, one worker per
//! platform and an optional metrics pusher, all under one shutdown signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::error::LogResult;
use crate::messaging::{
    AmqpConnector, Client, ClientOptions, Exchange, ExchangeKind, KafkaReaderFactory,
    LogReaderFactory, ReaderConfig,
};
use crate::metrics::{ConsumerMetrics, PrometheusMetrics};
use crate::platform::PlatformRegistry;
use crate::shutdown::{self, Shutdown};
use crate::types::{AppConfig, KafkaConfig};
use crate::worker::{self, MetricsPusher, PlatformWorker, Worker};

/// Exchange every platform worker publishes to.
pub const EXCHANGE_TRANSACTIONS_PARSED: &str = "transactions.parsed";

pub struct App {
    client: Arc<Client>,
    metrics_pusher: Option<Arc<dyn Worker>>,
    workers: Vec<Arc<dyn Worker>>,
}

impl App {
    /// Dial the broker, declare the shared exchange and build one Kafka-backed
    /// worker per configured platform.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let registry =
            PlatformRegistry::from_handles(&config.platforms).context("Invalid platform list")?;

        let options = ClientOptions::default()
            .with_conn_check_interval(config.rabbitmq.conn_check_interval());
        let client = Client::connect(&config.rabbitmq.url, Arc::new(AmqpConnector), options)
            .await
            .context("RabbitMQ init error")?;

        let job = config.prometheus.prefix();
        let metrics_pusher = if config.prometheus.push_gateway.enabled() {
            match MetricsPusher::new(&config.prometheus.push_gateway, &job) {
                Ok(pusher) => Some(Arc::new(pusher) as Arc<dyn Worker>),
                Err(e) => {
                    warn!(error = %e, "Metrics pusher init error");
                    None
                }
            }
        } else {
            None
        };

        let metrics = PrometheusMetrics::new(&job);
        metrics.describe();

        let exchange = client.init_exchange(EXCHANGE_TRANSACTIONS_PARSED);
        exchange
            .declare(ExchangeKind::Topic)
            .await
            .with_context(|| format!("Failed to declare exchange {EXCHANGE_TRANSACTIONS_PARSED}"))?;

        let workers = build_workers(
            &registry,
            &config.kafka,
            &exchange,
            &KafkaReaderFactory,
            Arc::new(metrics),
        )
        .context("Kafka reader init error")?;

        Ok(Self::from_parts(client, metrics_pusher, workers))
    }

    pub fn from_parts(
        client: Arc<Client>,
        metrics_pusher: Option<Arc<dyn Worker>>,
        workers: Vec<Arc<dyn Worker>>,
    ) -> Self {
        Self {
            client,
            metrics_pusher,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run every task until `shutdown` fires or the broker connection is
    /// lost for good, then wait for all of them to exit.
    ///
    /// Workers are stopped before the broker connection is closed. Returns
    /// the reconnection error if that is what ended the run.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        let (workers_trigger, workers_shutdown) = shutdown::channel();
        let (listener_trigger, listener_shutdown) = shutdown::channel();

        let mut listener = self.client.listen_connection_async(listener_shutdown);

        let mut handles = Vec::with_capacity(self.workers.len() + 1);
        if let Some(pusher) = &self.metrics_pusher {
            handles.push(worker::start(Arc::clone(pusher), workers_shutdown.clone()));
        }
        for worker in &self.workers {
            handles.push(worker::start(Arc::clone(worker), workers_shutdown.clone()));
        }
        info!(workers = self.workers.len(), "Block consumer running");

        let fatal = tokio::select! {
            _ = shutdown.recv() => None,
            result = &mut listener => Some(result),
        };

        if fatal.is_some() {
            error!("MQ connection listener exited, stopping workers");
        } else {
            info!("Shutting down");
        }

        workers_trigger.fire();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        let listener_result = match fatal {
            Some(result) => result,
            None => {
                listener_trigger.fire();
                listener.await
            }
        };

        match listener_result.context("MQ connection listener task failed")? {
            Ok(()) => {
                info!("Block consumer stopped");
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("MQ connection lost")),
        }
    }
}

/// One worker per platform, each with its own reader and consumer group.
pub fn build_workers(
    registry: &PlatformRegistry,
    kafka: &KafkaConfig,
    exchange: &Exchange,
    readers: &dyn LogReaderFactory,
    metrics: Arc<dyn ConsumerMetrics>,
) -> LogResult<Vec<Arc<dyn Worker>>> {
    registry
        .platforms()
        .iter()
        .map(|platform| {
            let coin = *platform.coin();
            let config = ReaderConfig::for_coin(kafka, coin.handle);
            let reader = readers.create(&config)?;

            let worker = PlatformWorker::new(
                coin,
                exchange.clone(),
                reader,
                Arc::clone(&metrics),
                config.max_attempts,
            );
            Ok(Arc::new(worker) as Arc<dyn Worker>)
        })
        .collect()
}
