//! Long-running tasks driven by the orchestrator.

mod metrics_pusher;
mod platform_worker;

pub use metrics_pusher::MetricsPusher;
pub use platform_worker::PlatformWorker;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use crate::shutdown::Shutdown;

/// A task that runs until shutdown.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `shutdown` fires, then release resources and return.
    async fn run(&self, shutdown: Shutdown);
}

/// Spawn `worker` on its own task. The handle completes once the worker has
/// released its resources.
pub fn start(worker: Arc<dyn Worker>, shutdown: Shutdown) -> JoinHandle<()> {
    let span = info_span!("worker", name = %worker.name());
    tokio::spawn(async move { worker.run(shutdown).await }.instrument(span))
}
