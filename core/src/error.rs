//! Error kinds of the consumption engine.
//!
//! Each kind has its own propagation policy:
//!
//! - [`ConnectionError`]: transient, recovered by the reconnect loop
//! - [`BindError`]: configuration mismatch, fatal to the consumer instance
//! - [`DecodeError`]: poison payload, contained to one delivery
//! - [`HandlerError`]: business failure, requeued up to a bound then dead-lettered
//! - [`UnroutableError`]: no route for the delivery, contained to one delivery
//! - [`ConfigError`]: invalid configuration, fatal at startup

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the broker at the connection or channel level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Could not open a connection to the given broker URL
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed {
        /// Broker URL that was tried
        url: String,
        /// The reason for failure
        reason: String,
    },

    /// A broker URL did not answer within the connect timeout
    #[error("Connecting to {url} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Broker URL that was tried, credentials removed
        url: String,
        /// Time allowed for the attempt
        timeout: Duration,
    },

    /// No broker URLs were configured
    #[error("No broker URLs configured")]
    NoUrls,

    /// An established connection or channel went away
    #[error("Connection lost: {0}")]
    Lost(String),

    /// An operation on an open channel failed (ack, nack, cancel, close)
    #[error("Channel operation failed: {0}")]
    Channel(String),

    /// The startup retry budget ran out before a first connection succeeded
    #[error("Startup retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted {
        /// Number of connection attempts made
        attempts: usize,
    },

    /// A shutdown signal was raised while the connection loop was waiting
    #[error("Shutdown requested while connecting")]
    ShutdownRequested,
}

/// Errors raised while declaring topology or starting consumption.
///
/// These usually indicate a configuration mismatch with what already exists on
/// the broker and are not retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Exchange declaration failed
    #[error("Failed to declare exchange '{exchange}': {reason}")]
    ExchangeDeclare {
        /// Exchange name
        exchange: String,
        /// The reason for failure
        reason: String,
    },

    /// Queue declaration failed
    #[error("Failed to declare queue '{queue}': {reason}")]
    QueueDeclare {
        /// Queue name
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Queue binding failed
    #[error("Failed to bind queue '{queue}' to exchange '{exchange}' with key '{routing_key}': {reason}")]
    QueueBind {
        /// Queue name
        queue: String,
        /// Exchange name
        exchange: String,
        /// Routing key used for the binding
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Setting the prefetch window failed
    #[error("Failed to set prefetch to {prefetch}: {reason}")]
    Qos {
        /// Requested prefetch count
        prefetch: u16,
        /// The reason for failure
        reason: String,
    },

    /// Starting the consumer failed
    #[error("Failed to consume from queue '{queue}': {reason}")]
    Consume {
        /// Queue name
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Fanout delivery requires durable exchange and queue
    #[error("Fanout exchange '{exchange}' and queue '{queue}' must both be durable")]
    NotDurable {
        /// Exchange name
        exchange: String,
        /// Queue name
        queue: String,
    },

    /// The channel is not open
    #[error("Channel is not connected")]
    NotConnected,
}

/// A payload could not be decoded. Treated as a poison message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload was empty
    #[error("Payload is empty")]
    Empty,

    /// The payload is not valid JSON
    #[error("Payload is not valid JSON: {0}")]
    Json(String),

    /// The decoder does not understand the declared content type
    #[error("Unsupported content type '{0}'")]
    UnsupportedContentType(String),

    /// The payload decoded but does not match the handler's expected shape
    #[error("Payload does not match the expected shape: {0}")]
    Shape(String),
}

/// A handler failed to process a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Business logic reported a failure
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The handler did not complete within the configured timeout
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// The handler could not interpret the payload
    ///
    /// Unlike the other variants this one is never retried.
    #[error("Handler rejected payload: {0}")]
    Decode(#[from] DecodeError),
}

impl HandlerError {
    /// Create a business logic failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Whether retrying the same payload could ever succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

/// A delivery could not be routed to a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnroutableError {
    /// The delivery carried no event pattern in its metadata
    #[error("Delivery carries no event pattern")]
    MissingPattern,

    /// No handler is registered for the pattern
    #[error("No handler registered for pattern '{0}'")]
    NoHandler(String),
}

/// Invalid configuration detected at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Broker auto-ack was requested
    #[error("no_ack must be false: broker auto-ack defeats at-least-once delivery")]
    AutoAckEnabled,

    /// A value could not be parsed or is out of range
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// Configuration key
        key: String,
        /// The reason the value was rejected
        reason: String,
    },

    /// The dead letter exchange is blank or routes back into the consumed queue
    #[error("Invalid dead letter exchange '{exchange}': {reason}")]
    DeadLetterExchange {
        /// Configured dead letter exchange
        exchange: String,
        /// The reason it was rejected
        reason: String,
    },
}
