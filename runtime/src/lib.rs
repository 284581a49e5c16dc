//! # Notifier Runtime
//!
//! The at-least-once consumption engine.
//!
//! ## Core Components
//!
//! - **Connection Manager**: connect with failover, reconnect with backoff, publish state
//! - **Subscription Binder**: declare exchange/queue/bindings, start a manual-ack consumer
//! - **Delivery Dispatcher**: route by event pattern, decode, invoke, ack/nack/reject
//! - **Consumer**: the run loop wiring the three together, with graceful drain
//!
//! ## Example
//!
//! ```ignore
//! use notifier_runtime::{Consumer, ConnectionManager, drain_channel};
//!
//! let connection = Arc::new(
//!     ConnectionManager::builder(broker)
//!         .url("amqp://localhost:5672")
//!         .build()?,
//! );
//!
//! let consumer = Consumer::builder(connection, Arc::new(registry))
//!     .exchange(ExchangeSpec::fanout("post_fanout_exchange"))
//!     .queue(QueueSpec::new("notification_fanout_queue"))
//!     .build()?;
//!
//! let (trigger, signal) = drain_channel();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     trigger.drain();
//! });
//!
//! consumer.run(signal).await?;
//! ```

/// Exponential backoff for reconnects
pub mod backoff;

/// Subscription binding
pub mod binder;

/// Connection lifecycle
pub mod connection;

/// Consumer run loop
pub mod consumer;

/// Dead letter record queue
pub mod dead_letter;

/// Delivery dispatch and settlement
pub mod dispatcher;

/// Health reporting
pub mod health;

/// At-most-once settlement guard
pub mod in_flight;

/// Prometheus metrics for observability
pub mod metrics;

/// Attempt counting across redeliveries
pub mod redelivery;

/// Drain signalling
pub mod shutdown;

pub use backoff::{BackoffPolicy, BackoffPolicyBuilder};
pub use binder::{ConsumerHandle, SubscriptionBinder};
pub use connection::{ConnectionManager, ConnectionManagerBuilder, DEFAULT_CONNECT_TIMEOUT, DisconnectCallback};
pub use consumer::{Consumer, ConsumerBuilder};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use dispatcher::{DeliveryDispatcher, DeliveryDispatcherBuilder, DispatchPolicy, Outcome, RejectReason};
pub use health::{Component, HealthCheck, HealthReport, HealthStatus};
pub use in_flight::InFlight;
pub use redelivery::RedeliveryTracker;
pub use shutdown::{DrainSignal, DrainTrigger, drain_channel};

use notifier_core::{BindError, ConfigError, ConnectionError};
use thiserror::Error;

/// Fatal errors that stop a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Could not establish a connection (startup budget exhausted, no URLs)
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Topology could not be declared or consumption started
    #[error(transparent)]
    Bind(#[from] BindError),
}
