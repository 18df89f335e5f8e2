//! Block Consumer Library
//!
//! Forwards finalized block records from one Kafka topic per blockchain to a
//! shared RabbitMQ exchange, surviving broker outages through a bounded
//! reconnection protocol.

pub mod address;
pub mod app;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod platform;
pub mod shutdown;
pub mod types;
pub mod worker;

pub use app::{App, EXCHANGE_TRANSACTIONS_PARSED};
pub use error::{ConfigError, LogError, MqError, PlatformError};
pub use messaging::{Client, ConnectionClient, ConnectionState, Consumer, Exchange, Queue};
pub use platform::{Coin, PlatformRegistry};
pub use types::AppConfig;
pub use worker::{PlatformWorker, Worker};
