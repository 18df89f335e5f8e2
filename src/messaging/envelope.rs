//! Names and the typed outbound message.

use std::fmt;

macro_rules! broker_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            /// Create a new name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the raw name.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

broker_name!(
    /// Name of a broker queue.
    QueueName
);
broker_name!(
    /// Name of a broker exchange. The empty name is the default exchange.
    ExchangeName
);
broker_name!(
    /// Routing key used when publishing to an exchange.
    ExchangeKey
);

/// Content type stamped on every published message.
pub const CONTENT_TYPE: &str = "text/plain";

/// Broker delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Lost on broker restart.
    Transient,
    /// Stored durably before the publish is acknowledged.
    Persistent,
}

/// Per-publish options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishConfig {
    /// Remaining reprocessing attempts carried with the message.
    pub max_retries: Option<u32>,
}

impl PublishConfig {
    /// Config carrying a remaining-retries count.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
        }
    }
}

/// A message ready to hand to the transport.
///
/// Built only through [`Envelope::persistent`], so every outbound message
/// is durable and typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    body: Vec<u8>,
    content_type: &'static str,
    delivery_mode: DeliveryMode,
    remaining_retries: Option<u32>,
}

impl Envelope {
    /// Wrap a body for durable delivery.
    pub fn persistent(body: impl Into<Vec<u8>>, config: PublishConfig) -> Self {
        Self {
            body: body.into(),
            content_type: CONTENT_TYPE,
            delivery_mode: DeliveryMode::Persistent,
            remaining_retries: config.max_retries,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn remaining_retries(&self) -> Option<u32> {
        self.remaining_retries
    }
}
