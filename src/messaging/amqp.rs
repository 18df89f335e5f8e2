//! RabbitMQ transport built on `lapin`.
//!
//! This is the only place that knows about AMQP properties. The typed
//! [`Envelope`] is turned into `BasicProperties` here and the
//! remaining-retries header is read back into a plain integer on delivery.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery as AmqpDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel as LapinChannel, Connection as LapinConnection,
    ConnectionProperties, ExchangeKind as LapinExchangeKind,
};
use tracing::{debug, info, instrument};

use super::envelope::{DeliveryMode, Envelope, ExchangeKey, ExchangeName, QueueName};
use super::transport::{
    Acknowledger, Channel, Connection, Connector, Delivery, DeliveryStream, ExchangeKind,
};
use crate::error::{MqError, MqResult};

/// Header carrying the remaining reprocessing attempts.
pub const HEADER_REMAINING_RETRIES: &str = "remaining_retries";

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ with `lapin`.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, url: &str) -> MqResult<Arc<dyn Connection>> {
        let connection = LapinConnection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| MqError::Connection(e.to_string()))?;

        info!("RabbitMQ connection established");

        Ok(Arc::new(AmqpConnection { inner: connection }))
    }
}

struct AmqpConnection {
    inner: LapinConnection,
}

#[async_trait]
impl Connection for AmqpConnection {
    fn is_closed(&self) -> bool {
        !self.inner.status().connected()
    }

    async fn open_channel(&self) -> MqResult<Arc<dyn Channel>> {
        let channel = self
            .inner
            .create_channel()
            .await
            .map_err(|e| MqError::Channel(e.to_string()))?;

        Ok(Arc::new(AmqpChannel { inner: channel }))
    }

    async fn close(&self) -> MqResult<()> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| MqError::Close(e.to_string()))
    }
}

struct AmqpChannel {
    inner: LapinChannel,
}

#[async_trait]
impl Channel for AmqpChannel {
    #[instrument(skip(self, envelope), fields(len = envelope.body().len()))]
    async fn publish(
        &self,
        exchange: &ExchangeName,
        key: &ExchangeKey,
        envelope: &Envelope,
    ) -> MqResult<()> {
        let publish_error = |e: lapin::Error| MqError::Publish {
            exchange: exchange.to_string(),
            message: e.to_string(),
        };

        self.inner
            .basic_publish(
                exchange.as_str(),
                key.as_str(),
                BasicPublishOptions::default(),
                envelope.body(),
                properties_for(envelope),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        debug!(exchange = %exchange, key = %key, "Message published");

        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueName,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> MqResult<DeliveryStream> {
        let consume_error = |e: lapin::Error| MqError::Consume {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        self.inner
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(consume_error)?;

        let consumer = self
            .inner
            .basic_consume(
                queue.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(consume_error)?;

        info!(queue = %queue, tag = consumer_tag, "Started consuming");

        let queue = queue.to_string();
        let stream = consumer.map(move |delivery| {
            delivery.map(into_delivery).map_err(|e| MqError::Consume {
                queue: queue.clone(),
                message: e.to_string(),
            })
        });

        Ok(stream.boxed())
    }

    async fn declare_exchange(&self, exchange: &ExchangeName, kind: ExchangeKind) -> MqResult<()> {
        let kind = match kind {
            ExchangeKind::Direct => LapinExchangeKind::Direct,
            ExchangeKind::Fanout => LapinExchangeKind::Fanout,
            ExchangeKind::Topic => LapinExchangeKind::Topic,
        };

        self.inner
            .exchange_declare(
                exchange.as_str(),
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MqError::Declare {
                resource: format!("exchange '{exchange}'"),
                message: e.to_string(),
            })
    }

    async fn declare_queue(&self, queue: &QueueName) -> MqResult<()> {
        self.inner
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| MqError::Declare {
                resource: format!("queue '{queue}'"),
                message: e.to_string(),
            })
    }

    async fn bind_queue(
        &self,
        queue: &QueueName,
        exchange: &ExchangeName,
        key: &ExchangeKey,
    ) -> MqResult<()> {
        self.inner
            .queue_bind(
                queue.as_str(),
                exchange.as_str(),
                key.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MqError::Declare {
                resource: format!("binding '{queue}' -> '{exchange}'"),
                message: e.to_string(),
            })
    }

    async fn close(&self) -> MqResult<()> {
        self.inner
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| MqError::Channel(e.to_string()))
    }
}

struct AmqpAcker {
    inner: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> MqResult<()> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| MqError::Ack(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> MqResult<()> {
        self.inner
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| MqError::Ack(e.to_string()))
    }
}

/// AMQP properties for an outbound envelope.
pub(crate) fn properties_for(envelope: &Envelope) -> BasicProperties {
    let delivery_mode = match envelope.delivery_mode() {
        DeliveryMode::Transient => 1,
        DeliveryMode::Persistent => 2,
    };

    let properties = BasicProperties::default()
        .with_delivery_mode(delivery_mode)
        .with_content_type(ShortString::from(envelope.content_type()));

    match envelope.remaining_retries() {
        Some(retries) => {
            let mut headers = FieldTable::default();
            headers.insert(
                ShortString::from(HEADER_REMAINING_RETRIES),
                AMQPValue::LongLongInt(i64::from(retries)),
            );
            properties.with_headers(headers)
        }
        None => properties,
    }
}

/// Read the remaining-retries header back from inbound properties.
pub(crate) fn remaining_retries(properties: &BasicProperties) -> Option<u32> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == HEADER_REMAINING_RETRIES)?;

    let value = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        _ => return None,
    };

    u32::try_from(value).ok()
}

fn into_delivery(delivery: AmqpDelivery) -> Delivery {
    let retries = remaining_retries(&delivery.properties);
    Delivery::new(
        delivery.data,
        retries,
        delivery.redelivered,
        Box::new(AmqpAcker {
            inner: delivery.acker,
        }),
    )
}
