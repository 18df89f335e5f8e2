//! Core types for the block consumer.

mod config;

pub use config::{
    AppConfig, KafkaConfig, PrometheusConfig, PushGatewayConfig, RabbitMqConfig, CONFIG_PATH_ENV,
};
