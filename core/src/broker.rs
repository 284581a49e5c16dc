//! Broker abstraction.
//!
//! The consumption engine talks to the broker only through these two traits:
//!
//! - [`Broker`] opens a channel to one broker URL
//! - [`BrokerChannel`] declares topology, consumes, and settles deliveries
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `notifier-testing` - for tests (fault injection, inspection)
//! - `AmqpBroker` in `notifier-amqp` - for production (AMQP 0-9-1 via `lapin`)
//!
//! # Dyn Compatibility
//!
//! Both traits use explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
//! so they can be held as `Arc<dyn Broker>` / `Arc<dyn BrokerChannel>` and
//! shared between the connection manager, binder and dispatcher tasks.

use crate::delivery::{Delivery, DeliveryTag};
use crate::error::{BindError, ConnectionError};
use crate::topology::{ExchangeSpec, QueueSpec};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of deliveries from one consumer.
///
/// The stream ending or yielding an error means the channel is gone and the
/// consumer must reconnect.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, ConnectionError>> + Send>>;

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Settlement {
    /// Positive acknowledgment; the broker forgets the message
    Ack,
    /// Negative acknowledgment
    Nack {
        /// Put the message back on the queue for redelivery
        requeue: bool,
    },
    /// Rejection; without requeue the message is dead-lettered or dropped
    Reject {
        /// Put the message back on the queue for redelivery
        requeue: bool,
    },
}

impl Settlement {
    /// Whether the broker will redeliver the message.
    #[must_use]
    pub const fn requeues(self) -> bool {
        match self {
            Self::Ack => false,
            Self::Nack { requeue } | Self::Reject { requeue } => requeue,
        }
    }
}

impl fmt::Display for Settlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack { requeue } => write!(f, "nack(requeue={requeue})"),
            Self::Reject { requeue } => write!(f, "reject(requeue={requeue})"),
        }
    }
}

/// Factory for broker channels.
pub trait Broker: Send + Sync {
    /// Open a connection and a channel to the broker at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectFailed`] if the broker is unreachable
    /// or refuses the connection.
    fn connect<'a>(&'a self, url: &'a str) -> BrokerFuture<'a, Result<Arc<dyn BrokerChannel>, ConnectionError>>;
}

/// One open channel on one connection.
///
/// Declarations are idempotent: declaring an entity that already exists with
/// the same attributes succeeds; declaring it with different attributes fails.
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::ExchangeDeclare`] on failure or attribute mismatch.
    fn declare_exchange<'a>(&'a self, spec: &'a ExchangeSpec) -> BrokerFuture<'a, Result<(), BindError>>;

    /// Declare a queue, including its dead-letter exchange argument.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::QueueDeclare`] on failure or attribute mismatch.
    fn declare_queue<'a>(&'a self, spec: &'a QueueSpec) -> BrokerFuture<'a, Result<(), BindError>>;

    /// Bind a queue to an exchange.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::QueueBind`] if either side does not exist.
    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> BrokerFuture<'a, Result<(), BindError>>;

    /// Limit the number of unacknowledged deliveries on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::Qos`] on failure.
    fn set_prefetch(&self, prefetch: u16) -> BrokerFuture<'_, Result<(), BindError>>;

    /// Start consuming from a queue with manual acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::Consume`] if the queue does not exist or the
    /// consumer cannot be registered.
    fn consume<'a>(&'a self, queue: &'a str, consumer_tag: &'a str) -> BrokerFuture<'a, Result<DeliveryStream, BindError>>;

    /// Stop a consumer; deliveries already received stay unacknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Channel`] on failure.
    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BrokerFuture<'a, Result<(), ConnectionError>>;

    /// Settle one delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the channel is closed; the broker will
    /// then redeliver the message.
    fn settle(&self, tag: DeliveryTag, settlement: Settlement) -> BrokerFuture<'_, Result<(), ConnectionError>>;

    /// Close channel and connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Channel`] if the close handshake fails.
    fn close(&self) -> BrokerFuture<'_, Result<(), ConnectionError>>;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;
}
