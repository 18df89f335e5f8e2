//! Metrics recorded by the block consumer.
//!
//! Counters go through the `metrics` facade and are exported by the
//! Prometheus push gateway exporter (see [`crate::worker::MetricsPusher`]).
//! Workers depend on the [`ConsumerMetrics`] trait so tests can count calls.

use metrics::{counter, describe_counter};

/// Per-record counters emitted by platform workers.
pub trait ConsumerMetrics: Send + Sync {
    /// A block record was forwarded to the exchange.
    fn record_block_consumed(&self, coin: &str);

    /// A fetch gave up after exhausting its attempts.
    fn record_fetch_failure(&self, coin: &str);

    /// Forwarding a record to the exchange failed.
    fn record_publish_failure(&self, coin: &str);
}

/// [`ConsumerMetrics`] backed by the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    blocks_consumed: String,
    fetch_failures: String,
    publish_failures: String,
}

impl PrometheusMetrics {
    /// Metric names are prefixed with `<namespace>_<subsystem>`.
    pub fn new(prefix: &str) -> Self {
        Self {
            blocks_consumed: format!("{prefix}_blocks_consumed_total"),
            fetch_failures: format!("{prefix}_fetch_failures_total"),
            publish_failures: format!("{prefix}_publish_failures_total"),
        }
    }

    /// Register metric descriptions. Call once at startup.
    pub fn describe(&self) {
        describe_counter!(
            self.blocks_consumed.clone(),
            "Total number of block records forwarded to the exchange"
        );
        describe_counter!(
            self.fetch_failures.clone(),
            "Total number of log fetches abandoned after all attempts"
        );
        describe_counter!(
            self.publish_failures.clone(),
            "Total number of block records that failed to publish"
        );
    }

    pub fn blocks_consumed_name(&self) -> &str {
        &self.blocks_consumed
    }
}

impl ConsumerMetrics for PrometheusMetrics {
    fn record_block_consumed(&self, coin: &str) {
        counter!(self.blocks_consumed.clone(), "coin" => coin.to_string()).increment(1);
    }

    fn record_fetch_failure(&self, coin: &str) {
        counter!(self.fetch_failures.clone(), "coin" => coin.to_string()).increment(1);
    }

    fn record_publish_failure(&self, coin: &str) {
        counter!(self.publish_failures.clone(), "coin" => coin.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_prefixed() {
        let metrics = PrometheusMetrics::new("indexer_consumer");
        assert_eq!(
            metrics.blocks_consumed_name(),
            "indexer_consumer_blocks_consumed_total"
        );
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = PrometheusMetrics::new("indexer_consumer");
        metrics.describe();
        metrics.record_block_consumed("btc");
        metrics.record_fetch_failure("btc");
        metrics.record_publish_failure("btc");
    }
}
