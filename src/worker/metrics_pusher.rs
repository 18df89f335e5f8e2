//! Periodic push of process metrics to a Prometheus push gateway.

use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::Worker;
use crate::shutdown::Shutdown;
use crate::types::PushGatewayConfig;

type PushFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Installs the global Prometheus recorder and pushes its snapshot on a
/// fixed interval until shutdown.
pub struct MetricsPusher {
    name: String,
    endpoint: String,
    exporter: Mutex<Option<PushFuture>>,
}

impl MetricsPusher {
    /// Build the exporter for job `job` and install it as the global recorder.
    pub fn new(config: &PushGatewayConfig, job: &str) -> Result<Self> {
        if !config.enabled() {
            bail!("push gateway url is empty");
        }

        let endpoint = push_endpoint(&config.url, job);
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_push_gateway(
                &endpoint,
                config.push_interval(),
                config.username.clone(),
                config.password.clone(),
            )
            .context("Invalid push gateway endpoint")?
            .build()
            .context("Failed to build push gateway exporter")?;

        metrics::set_global_recorder(recorder)
            .map_err(|_| anyhow!("a global metrics recorder is already installed"))?;

        let exporter: PushFuture = Box::pin(async move {
            exporter
                .await
                .map_err(|_| "push gateway exporter stopped".to_string())
        });

        Ok(Self {
            name: format!("metrics-pusher-{job}"),
            endpoint,
            exporter: Mutex::new(Some(exporter)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Worker for MetricsPusher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut shutdown: Shutdown) {
        let Some(exporter) = self.exporter.lock().await.take() else {
            return;
        };

        info!(endpoint = %self.endpoint, "Metrics pusher started");
        tokio::select! {
            _ = shutdown.recv() => {}
            result = exporter => {
                if let Err(e) = result {
                    error!(endpoint = %self.endpoint, error = %e, "Metrics push failed");
                }
            }
        }
        info!("Metrics pusher stopped");
    }
}

/// `<url>/metrics/job/<job>`.
pub fn push_endpoint(url: &str, job: &str) -> String {
    format!("{}/metrics/job/{}", url.trim().trim_end_matches('/'), job)
}
