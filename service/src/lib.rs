//! Notification service.
//!
//! Consumes `post.created` events from the `post_fanout_exchange` fanout
//! exchange through the durable `notification_fanout_queue` and logs a
//! notification for each one. Messages are acknowledged only after the
//! handler succeeds.
//!
//! # Architecture
//!
//! ```text
//! post service ──publish──▶ post_fanout_exchange (fanout, durable)
//!                                   │
//!                                   ▼
//!                      notification_fanout_queue (durable)
//!                                   │  manual ack, prefetch = concurrency
//!                                   ▼
//!                 Consumer ─▶ DeliveryDispatcher ─▶ PostCreatedHandler
//! ```

pub mod config;
pub mod handlers;

use config::Config;
use notifier_core::{Broker, ConfigError};
use notifier_runtime::{ConnectionManager, Consumer, ConsumerError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that stop the service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The consumer stopped with a fatal error
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

/// Wire a consumer for `config` on top of `broker`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the configuration is rejected by the
/// connection manager or the consumer builder.
pub fn build_consumer(config: &Config, broker: Arc<dyn Broker>) -> Result<Consumer, ConfigError> {
    let mut connection = ConnectionManager::builder(broker)
        .urls(config.amqp.urls.iter().cloned())
        .no_ack(config.amqp.no_ack)
        .connect_timeout(config.connect_timeout())
        .backoff(config.backoff());
    if let Some(budget) = config.amqp.startup_retry_budget {
        connection = connection.startup_retry_budget(budget);
    }
    let connection = Arc::new(connection.build()?);

    let consumer = Consumer::builder(connection, Arc::new(handlers::registry()))
        .exchange(config.exchange_spec()?)
        .queue(config.queue_spec())
        .policy(config.dispatch_policy())
        .shutdown_grace(config.shutdown_grace())
        .build()?;

    Ok(consumer)
}
