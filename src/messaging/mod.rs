//! # Messaging
//!
//! Resilient publish/subscribe layer over RabbitMQ plus the Kafka log reader
//! feeding it.
//!
//! ## Features
//! - One broker connection per [`Client`], health-checked and reconnected
//!   with a bounded attempt loop
//! - Reconnect notification for registered [`ConnectionClient`]s
//! - Durable publishing with a typed remaining-retries field
//! - Per-blockchain Kafka readers with independent consumer groups

pub mod amqp;
pub mod client;
pub mod consumer;
pub mod envelope;
pub mod handles;
pub mod kafka_reader;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use amqp::AmqpConnector;
pub use client::{Client, ClientOptions, ConnectionClient, ConnectionState};
pub use consumer::{Consumer, ConsumerOptions, MessageProcessor, ProcessOutcome};
pub use envelope::{DeliveryMode, Envelope, ExchangeKey, ExchangeName, PublishConfig, QueueName};
pub use handles::{Exchange, Queue};
pub use kafka_reader::{
    KafkaLogReader, KafkaReaderFactory, LogReader, LogReaderFactory, LogRecord, ReaderConfig,
    StartOffset,
};
pub use transport::{Channel, Connection, Connector, Delivery, ExchangeKind};
