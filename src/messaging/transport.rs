//! Broker transport seam.
//!
//! The messaging client only talks to the broker through these traits.
//! [`super::amqp`] implements them on top of `lapin`; tests use an
//! in-memory broker.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::envelope::{Envelope, ExchangeKey, ExchangeName, QueueName};
use crate::error::MqResult;

/// Stream of deliveries for one subscription. Ends when the channel dies.
pub type DeliveryStream = BoxStream<'static, MqResult<Delivery>>;

/// Dials new broker connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> MqResult<Arc<dyn Connection>>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the broker side has gone away.
    fn is_closed(&self) -> bool;

    async fn open_channel(&self) -> MqResult<Arc<dyn Channel>>;

    async fn close(&self) -> MqResult<()>;
}

/// A channel multiplexed over a connection.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn publish(
        &self,
        exchange: &ExchangeName,
        key: &ExchangeKey,
        envelope: &Envelope,
    ) -> MqResult<()>;

    async fn consume(
        &self,
        queue: &QueueName,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> MqResult<DeliveryStream>;

    async fn declare_exchange(&self, exchange: &ExchangeName, kind: ExchangeKind) -> MqResult<()>;

    async fn declare_queue(&self, queue: &QueueName) -> MqResult<()>;

    async fn bind_queue(
        &self,
        queue: &QueueName,
        exchange: &ExchangeName,
        key: &ExchangeKey,
    ) -> MqResult<()>;

    async fn close(&self) -> MqResult<()>;
}

/// Exchange routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        }
    }
}

/// Settles a single delivery on the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> MqResult<()>;

    async fn nack(&self, requeue: bool) -> MqResult<()>;
}

/// An inbound message.
pub struct Delivery {
    body: Vec<u8>,
    remaining_retries: Option<u32>,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        body: Vec<u8>,
        remaining_retries: Option<u32>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            remaining_retries,
            redelivered,
            acker,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Value of the remaining-retries header, if the publisher set one.
    pub fn remaining_retries(&self) -> Option<u32> {
        self.remaining_retries
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(&self) -> MqResult<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> MqResult<()> {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .field("remaining_retries", &self.remaining_retries)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
