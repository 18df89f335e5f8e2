//! Error types for the block consumer.
//!
//! - [`MqError`] - broker connection, publish and consume failures
//! - [`LogError`] - upstream partitioned-log failures
//! - [`PlatformError`] - platform registry lookups
//! - [`AddressError`] - address primitive validation
//! - [`ConfigError`] - configuration loading

use thiserror::Error;

/// Messaging layer errors.
#[derive(Debug, Error)]
pub enum MqError {
    /// Dialing the broker failed.
    #[error("failed to connect to broker: {0}")]
    Connection(String),

    /// Opening a channel on an established connection failed.
    #[error("failed to open a channel: {0}")]
    Channel(String),

    /// Declaring or binding a broker resource failed.
    #[error("failed to declare {resource}: {message}")]
    Declare {
        /// Exchange or queue name.
        resource: String,
        /// Transport error details.
        message: String,
    },

    /// Publishing a message failed.
    #[error("failed to publish a message to exchange '{exchange}': {message}")]
    Publish {
        /// Target exchange name.
        exchange: String,
        /// Transport error details.
        message: String,
    },

    /// Starting or running a consumer failed.
    #[error("failed to consume from queue '{queue}': {message}")]
    Consume {
        /// Source queue name.
        queue: String,
        /// Transport error details.
        message: String,
    },

    /// Acknowledging a delivery failed.
    #[error("failed to acknowledge delivery: {0}")]
    Ack(String),

    /// Closing the connection failed.
    #[error("failed to close connection: {0}")]
    Close(String),

    /// Every bounded reconnection attempt failed.
    #[error("failed to establish MQ connection after {attempts} attempts")]
    ReconnectionExhausted {
        /// Number of attempts made.
        attempts: usize,
    },

    /// The owning client was dropped while a handle was still in use.
    #[error("messaging client is no longer available")]
    ClientDropped,
}

/// Upstream log errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// Creating the reader failed.
    #[error("failed to create log reader for topic '{topic}': {message}")]
    Create {
        /// Topic the reader was created for.
        topic: String,
        /// Client error details.
        message: String,
    },

    /// Fetching the next record failed.
    #[error("failed to fetch from topic '{topic}': {message}")]
    Fetch {
        /// Topic being read.
        topic: String,
        /// Client error details.
        message: String,
    },

    /// Committing a consumed offset failed.
    #[error("failed to commit offset {offset} on topic '{topic}': {message}")]
    Commit {
        /// Topic being read.
        topic: String,
        /// Offset that could not be committed.
        offset: i64,
        /// Client error details.
        message: String,
    },

    /// The reader has been closed.
    #[error("log reader for topic '{0}' is closed")]
    Closed(String),
}

/// Platform registry errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The handle does not name a registered coin.
    #[error("unknown coin handle: {0}")]
    UnknownCoin(String),
}

/// Address primitive errors.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The input is not a hex string.
    #[error("failed to decode a string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Building or deserializing the layered configuration failed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value passed deserialization but is unusable.
    #[error("invalid configuration value for '{key}': {message}")]
    Invalid {
        /// Dotted configuration key.
        key: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for messaging operations.
pub type MqResult<T> = Result<T, MqError>;

/// Result type for upstream log operations.
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnection_exhausted_names_attempts() {
        let err = MqError::ReconnectionExhausted { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_address_error_from_hex() {
        let err: AddressError = hex::decode("zz").unwrap_err().into();
        assert!(err.to_string().starts_with("failed to decode"));
    }
}
