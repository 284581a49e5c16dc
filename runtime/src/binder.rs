//! Subscription Binder.
//!
//! Declares the consumer's topology on a fresh channel and opens the
//! consumption stream. Every declaration is idempotent on the broker, so the
//! binder runs again unchanged after each reconnect.
//!
//! Order of operations:
//!
//! 1. dead-letter exchange and `<queue>.dead-letter` queue, when configured
//! 2. target exchange (skipped in direct-to-queue mode)
//! 3. queue, with its `x-dead-letter-exchange` argument
//! 4. bindings: one with an empty key for fanout, one per binding key otherwise
//! 5. prefetch window
//! 6. manual-ack consumer

use notifier_core::{BindError, BrokerChannel, DeliveryStream, ExchangeKind, ExchangeSpec, QueueSpec};
use std::fmt;

/// An open consumption stream on a bound queue.
pub struct ConsumerHandle {
    /// Tag the consumer was registered under
    pub consumer_tag: String,
    /// Queue being consumed
    pub queue: String,
    /// Deliveries from the broker
    pub stream: DeliveryStream,
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("consumer_tag", &self.consumer_tag)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Binds a queue to an exchange and starts consumption.
#[derive(Debug, Clone)]
pub struct SubscriptionBinder {
    exchange: ExchangeSpec,
    queue: QueueSpec,
    prefetch: u16,
    consumer_tag: String,
}

impl SubscriptionBinder {
    /// Create a binder for `queue` on `exchange`, with a prefetch of 1.
    #[must_use]
    pub fn new(exchange: ExchangeSpec, queue: QueueSpec) -> Self {
        let consumer_tag = format!("{}-{}", queue.name, std::process::id());
        Self {
            exchange,
            queue,
            prefetch: 1,
            consumer_tag,
        }
    }

    /// Set the prefetch window (0 means unlimited).
    #[must_use]
    pub const fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Set the consumer tag.
    #[must_use]
    pub fn with_consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    /// Target exchange.
    #[must_use]
    pub const fn exchange(&self) -> &ExchangeSpec {
        &self.exchange
    }

    /// Consumed queue.
    #[must_use]
    pub const fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    /// Prefetch window.
    #[must_use]
    pub const fn prefetch(&self) -> u16 {
        self.prefetch
    }

    /// Consumer tag.
    #[must_use]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Check the configuration without touching the broker.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::NotDurable`] if a fanout exchange or its queue is
    /// not durable.
    pub fn validate(&self) -> Result<(), BindError> {
        let fanout = !self.exchange.is_default() && self.exchange.kind == ExchangeKind::Fanout;
        if fanout && !(self.exchange.durable && self.queue.durable) {
            return Err(BindError::NotDurable {
                exchange: self.exchange.name.clone(),
                queue: self.queue.name.clone(),
            });
        }
        Ok(())
    }

    /// Declare topology and start consuming.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] if the configuration is invalid, the channel is
    /// closed, or any declaration, binding or the consumer registration fails.
    #[tracing::instrument(skip_all, fields(exchange = %self.exchange.name, queue = %self.queue.name))]
    pub async fn bind(&self, channel: &dyn BrokerChannel) -> Result<ConsumerHandle, BindError> {
        self.validate()?;
        if !channel.is_open() {
            return Err(BindError::NotConnected);
        }

        if let Some(dlx) = &self.queue.dead_letter_exchange {
            self.declare_dead_letter_path(channel, dlx).await?;
        }

        if !self.exchange.is_default() {
            channel.declare_exchange(&self.exchange).await?;
        }

        channel.declare_queue(&self.queue).await?;

        if !self.exchange.is_default() {
            for routing_key in self.routing_keys() {
                channel
                    .bind_queue(&self.queue.name, &self.exchange.name, &routing_key)
                    .await?;
                tracing::debug!(routing_key = %routing_key, "Queue bound");
            }
        }

        channel.set_prefetch(self.prefetch).await?;
        let stream = channel.consume(&self.queue.name, &self.consumer_tag).await?;

        tracing::info!(
            kind = %self.exchange.kind,
            consumer_tag = %self.consumer_tag,
            prefetch = self.prefetch,
            "Subscription bound, consuming"
        );

        Ok(ConsumerHandle {
            consumer_tag: self.consumer_tag.clone(),
            queue: self.queue.name.clone(),
            stream,
        })
    }

    fn routing_keys(&self) -> Vec<String> {
        match self.exchange.kind {
            ExchangeKind::Fanout => vec![String::new()],
            ExchangeKind::Direct | ExchangeKind::Topic => self.queue.effective_binding_keys(),
        }
    }

    async fn declare_dead_letter_path(&self, channel: &dyn BrokerChannel, dlx: &str) -> Result<(), BindError> {
        let exchange = ExchangeSpec::fanout(dlx);
        let queue = QueueSpec::new(self.queue.dead_letter_queue_name());

        channel.declare_exchange(&exchange).await?;
        channel.declare_queue(&queue).await?;
        channel.bind_queue(&queue.name, &exchange.name, "").await?;

        tracing::debug!(dead_letter_exchange = %dlx, dead_letter_queue = %queue.name, "Dead-letter path declared");
        Ok(())
    }
}
