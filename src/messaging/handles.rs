//! Named endpoint handles.
//!
//! Handles are pure name bindings against a [`Client`]. Nothing touches the
//! broker until a handle is declared or published to, and every call goes
//! through whichever connection is current at that moment.

use std::sync::Arc;

use super::client::Client;
use super::envelope::{ExchangeKey, ExchangeName, PublishConfig, QueueName};
use super::transport::ExchangeKind;
use crate::error::MqResult;

/// A broker exchange.
#[derive(Clone)]
pub struct Exchange {
    name: ExchangeName,
    client: Arc<Client>,
}

impl Exchange {
    pub(crate) fn new(name: ExchangeName, client: Arc<Client>) -> Self {
        Self { name, client }
    }

    pub fn name(&self) -> &ExchangeName {
        &self.name
    }

    /// Declare the exchange as durable.
    pub async fn declare(&self, kind: ExchangeKind) -> MqResult<()> {
        self.client
            .channel()
            .await
            .declare_exchange(&self.name, kind)
            .await
    }

    pub async fn publish(&self, key: &ExchangeKey, body: impl Into<Vec<u8>>) -> MqResult<()> {
        self.client.publish(&self.name, key, body).await
    }

    pub async fn publish_with_config(
        &self,
        key: &ExchangeKey,
        body: impl Into<Vec<u8>>,
        config: PublishConfig,
    ) -> MqResult<()> {
        self.client
            .publish_with_config(&self.name, key, body, config)
            .await
    }
}

/// A broker queue.
#[derive(Clone)]
pub struct Queue {
    name: QueueName,
    client: Arc<Client>,
}

impl Queue {
    pub(crate) fn new(name: QueueName, client: Arc<Client>) -> Self {
        Self { name, client }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Declare the queue as durable.
    pub async fn declare(&self) -> MqResult<()> {
        self.client.channel().await.declare_queue(&self.name).await
    }

    /// Bind the queue to `exchange` under routing key `key`.
    pub async fn bind(&self, exchange: &Exchange, key: &ExchangeKey) -> MqResult<()> {
        self.client
            .channel()
            .await
            .bind_queue(&self.name, exchange.name(), key)
            .await
    }

    /// Publish straight to this queue through the default exchange.
    pub async fn publish(&self, body: impl Into<Vec<u8>>) -> MqResult<()> {
        self.publish_with_config(body, PublishConfig::default())
            .await
    }

    pub async fn publish_with_config(
        &self,
        body: impl Into<Vec<u8>>,
        config: PublishConfig,
    ) -> MqResult<()> {
        let key = ExchangeKey::new(self.name.as_str());
        self.client
            .publish_with_config(&ExchangeName::default(), &key, body, config)
            .await
    }
}
