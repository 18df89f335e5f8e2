//! Block Consumer - Main Entry Point
//!
//! Bridges per-blockchain Kafka block topics to the RabbitMQ
//! `transactions.parsed` exchange.

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use block_consumer::app::App;
use block_consumer::shutdown;
use block_consumer::types::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    info!("Starting Block Consumer v{}", env!("CARGO_PKG_VERSION"));
    info!(
        platforms = ?config.platforms,
        brokers = %config.kafka.brokers,
        "Configuration loaded"
    );

    let app = App::new(&config).await?;

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        trigger.fire();
    });

    app.run(shutdown).await
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("block_consumer=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
