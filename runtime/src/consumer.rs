//! Consumer run loop.
//!
//! Wires the Connection Manager, Subscription Binder and Delivery Dispatcher:
//!
//! ```text
//! ┌─► connect (with backoff) ─► bind ─► consume ──────────────┐
//! │                                       │                   │
//! └──────── connection lost ◄─────────────┘            drain signal
//!                                                             │
//!            cancel consumer ─► wait for in-flight (grace) ─► requeue rest ─► close
//! ```
//!
//! At most `concurrency` deliveries are processed at once and prefetch follows
//! concurrency, so with concurrency 1 each delivery is settled before the next
//! one arrives.

use crate::binder::{ConsumerHandle, SubscriptionBinder};
use crate::connection::ConnectionManager;
use crate::dead_letter::DeadLetterQueue;
use crate::dispatcher::{DeliveryDispatcher, DispatchPolicy, Outcome};
use crate::health::{HealthCheck, HealthReport};
use crate::in_flight::InFlight;
use crate::metrics::DeliveryMetrics;
use crate::shutdown::DrainSignal;
use crate::ConsumerError;
use futures::StreamExt;
use notifier_core::{
    BrokerChannel, ConfigError, ConnectionError, ConnectionState, Delivery, ExchangeSpec, HandlerRegistry,
    PayloadDecoder, QueueSpec, Settlement,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// What the consume loop woke up for.
enum Step {
    Permit(OwnedSemaphorePermit),
    Next(Option<Result<Delivery, ConnectionError>>),
}

/// How a consumption session ended.
enum SessionEnd {
    Drained,
    Lost(ConnectionError),
}

/// Long-running consumer for one queue.
#[derive(Debug)]
pub struct Consumer {
    connection: Arc<ConnectionManager>,
    binder: SubscriptionBinder,
    dispatcher: Arc<DeliveryDispatcher>,
    shutdown_grace: Duration,
}

impl Consumer {
    /// Create a builder.
    #[must_use]
    pub fn builder(connection: Arc<ConnectionManager>, registry: Arc<HandlerRegistry>) -> ConsumerBuilder {
        ConsumerBuilder {
            connection,
            registry,
            exchange: ExchangeSpec::fanout("post_fanout_exchange"),
            queue: QueueSpec::new("notification_fanout_queue"),
            decoder: None,
            policy: DispatchPolicy::default(),
            shutdown_grace: Duration::from_secs(10),
            dead_letter_capacity: 1000,
            consumer_tag: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The connection manager.
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// In-process record of dead-lettered deliveries.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<Delivery> {
        self.dispatcher.dead_letters()
    }

    /// Health of the connection and the dead letter record queue.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let dead_letters = self.dispatcher.dead_letters();
        HealthReport::new(vec![
            HealthCheck::connection(self.connection.state(), self.connection.connection_count()),
            HealthCheck::dead_letters(dead_letters.len(), dead_letters.max_size()),
        ])
    }

    /// Consume until drained.
    ///
    /// Connection loss is recovered by reconnecting and re-binding; only a
    /// drain signal ends the loop successfully.
    ///
    /// # Errors
    ///
    /// - [`ConsumerError::Bind`] if topology cannot be declared or consumption started
    /// - [`ConsumerError::Connection`] if the startup retry budget is exhausted
    ///   or no broker URL is configured
    pub async fn run(&self, mut shutdown: DrainSignal) -> Result<(), ConsumerError> {
        self.binder.validate()?;

        tracing::info!(
            exchange = %self.binder.exchange().name,
            queue = %self.binder.queue().name,
            max_attempts = self.dispatcher.policy().max_attempts,
            concurrency = self.dispatcher.policy().concurrency,
            "Consumer starting"
        );

        loop {
            let channel = match self.connection.connect_with_backoff(&mut shutdown).await {
                Ok(channel) => channel,
                Err(ConnectionError::ShutdownRequested) => {
                    tracing::info!("Drain requested before a connection was established");
                    return Ok(());
                },
                Err(e) => return Err(e.into()),
            };

            let handle = match self.binder.bind(channel.as_ref()).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to bind subscription");
                    close(channel.as_ref()).await;
                    self.connection.mark_closed();
                    return Err(e.into());
                },
            };

            match self.consume(&channel, handle, &mut shutdown).await {
                SessionEnd::Drained => {
                    tracing::info!("Consumer drained");
                    return Ok(());
                },
                SessionEnd::Lost(e) => {
                    self.connection.mark_lost(&e);
                },
            }
        }
    }

    async fn consume(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        handle: ConsumerHandle,
        shutdown: &mut DrainSignal,
    ) -> SessionEnd {
        let ConsumerHandle {
            consumer_tag,
            mut stream,
            ..
        } = handle;
        let in_flight = InFlight::new();
        let permits = Arc::new(Semaphore::new(self.dispatcher.policy().concurrency));
        let mut tasks = JoinSet::new();

        // Received and tracked, waiting for a permit. Normally at most one,
        // since prefetch equals concurrency.
        let mut pending: VecDeque<Delivery> = VecDeque::new();

        let lost = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_task(joined);
            }

            // The stream stays watched while deliveries wait for a permit:
            // with the prefetch window full it can only report a lost channel.
            let step = tokio::select! {
                biased;
                () = shutdown.wait() => break None,
                permit = Arc::clone(&permits).acquire_owned(), if !pending.is_empty() => match permit {
                    Ok(permit) => Step::Permit(permit),
                    Err(_) => break None,
                },
                next = stream.next() => Step::Next(next),
            };

            match step {
                Step::Permit(permit) => {
                    if let Some(delivery) = pending.pop_front() {
                        self.spawn_dispatch(&mut tasks, channel, &in_flight, permit, delivery);
                    }
                },
                Step::Next(Some(Ok(delivery))) => {
                    // Tracked on arrival so a drain requeues it even before dispatch.
                    in_flight.track(delivery.tag);
                    pending.push_back(delivery);
                },
                Step::Next(Some(Err(e))) => break Some(e),
                Step::Next(None) => break Some(stream_ended()),
            }
        };

        if let Some(error) = lost {
            tasks.shutdown().await;
            close(channel.as_ref()).await;
            return SessionEnd::Lost(error);
        }

        self.drain(channel.as_ref(), &consumer_tag, &in_flight, pending, tasks).await;
        SessionEnd::Drained
    }

    fn spawn_dispatch(
        &self,
        tasks: &mut JoinSet<Result<Outcome, ConnectionError>>,
        channel: &Arc<dyn BrokerChannel>,
        in_flight: &InFlight,
        permit: OwnedSemaphorePermit,
        delivery: Delivery,
    ) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let channel = Arc::clone(channel);
        let in_flight = in_flight.clone();
        tasks.spawn(async move {
            let result = dispatcher.dispatch(channel.as_ref(), &in_flight, delivery).await;
            drop(permit);
            result
        });
    }

    async fn drain(
        &self,
        channel: &dyn BrokerChannel,
        consumer_tag: &str,
        in_flight: &InFlight,
        pending: VecDeque<Delivery>,
        mut tasks: JoinSet<Result<Outcome, ConnectionError>>,
    ) {
        self.connection.begin_drain();
        if let Err(e) = channel.cancel(consumer_tag).await {
            tracing::warn!(error = %e, "Failed to cancel consumer");
        }

        // Never dispatched, so nothing to wait for.
        let mut requeued = 0;
        for delivery in pending {
            if !in_flight.claim(delivery.tag) {
                continue;
            }
            match channel.settle(delivery.tag, Settlement::Nack { requeue: true }).await {
                Ok(()) => requeued += 1,
                Err(e) => tracing::warn!(tag = %delivery.tag, error = %e, "Failed to requeue undispatched delivery"),
            }
        }
        if requeued > 0 {
            DeliveryMetrics::record_drain_requeued(requeued);
            tracing::info!(count = requeued, "Requeued deliveries that were never dispatched");
        }

        tracing::info!(
            in_flight = in_flight.len(),
            grace_ms = u64::try_from(self.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
            "Draining in-flight deliveries"
        );

        let finished = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_task(joined);
            }
        })
        .await;
        if finished.is_err() {
            tracing::warn!(remaining = tasks.len(), "Shutdown grace period elapsed with handlers still running");
        }

        let unsettled = in_flight.claim_all();
        for tag in &unsettled {
            if let Err(e) = channel.settle(*tag, Settlement::Nack { requeue: true }).await {
                tracing::warn!(tag = %tag, error = %e, "Failed to requeue delivery at drain");
            }
        }
        if !unsettled.is_empty() {
            DeliveryMetrics::record_drain_requeued(unsettled.len());
            tracing::warn!(count = unsettled.len(), "Requeued unsettled deliveries at drain");
        }

        tasks.shutdown().await;
        close(channel).await;
        self.connection.mark_closed();
    }
}

fn stream_ended() -> ConnectionError {
    ConnectionError::Lost("consumer stream ended".to_string())
}

async fn close(channel: &dyn BrokerChannel) {
    if !channel.is_open() {
        return;
    }
    if let Err(e) = channel.close().await {
        tracing::warn!(error = %e, "Failed to close channel");
    }
}

fn log_task(joined: Result<Result<Outcome, ConnectionError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(outcome)) => tracing::trace!(outcome = outcome.label(), "Dispatch finished"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Settlement failed, broker will redeliver"),
        Err(e) if e.is_cancelled() => tracing::debug!("Dispatch task cancelled"),
        Err(e) => tracing::error!(error = %e, "Dispatch task failed"),
    }
}

/// Builder for [`Consumer`].
pub struct ConsumerBuilder {
    connection: Arc<ConnectionManager>,
    registry: Arc<HandlerRegistry>,
    exchange: ExchangeSpec,
    queue: QueueSpec,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    policy: DispatchPolicy,
    shutdown_grace: Duration,
    dead_letter_capacity: usize,
    consumer_tag: Option<String>,
}

impl ConsumerBuilder {
    /// Set the exchange to bind to. An empty name consumes the queue directly.
    #[must_use]
    pub fn exchange(mut self, exchange: ExchangeSpec) -> Self {
        self.exchange = exchange;
        self
    }

    /// Set the queue to consume.
    #[must_use]
    pub fn queue(mut self, queue: QueueSpec) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the JSON payload decoder.
    #[must_use]
    pub fn decoder<D: PayloadDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Set retry and concurrency settings. Prefetch follows concurrency.
    #[must_use]
    pub const fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Time in-flight handlers get to finish at drain.
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Size of the in-process dead letter record queue.
    #[must_use]
    pub const fn dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    /// Override the consumer tag.
    #[must_use]
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the dispatch policy is invalid or
    /// the queue name is empty, and [`ConfigError::DeadLetterExchange`] if the
    /// dead letter exchange is blank or is the consumed exchange.
    pub fn build(self) -> Result<Consumer, ConfigError> {
        if self.queue.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "queue".to_string(),
                reason: "queue name must not be empty".to_string(),
            });
        }
        self.queue.validate_dead_letter_exchange(&self.exchange.name)?;

        let prefetch = u16::try_from(self.policy.concurrency).unwrap_or(u16::MAX);
        let dead_letter_exchange = self.queue.dead_letter_exchange.clone();

        let mut binder = SubscriptionBinder::new(self.exchange, self.queue).with_prefetch(prefetch);
        if let Some(tag) = self.consumer_tag {
            binder = binder.with_consumer_tag(tag);
        }

        let mut dispatcher = DeliveryDispatcher::builder(self.registry)
            .policy(self.policy)
            .dead_letter_exchange(dead_letter_exchange)
            .dead_letter_capacity(self.dead_letter_capacity);
        if let Some(decoder) = self.decoder {
            dispatcher = dispatcher.shared_decoder(decoder);
        }

        Ok(Consumer {
            connection: self.connection,
            binder,
            dispatcher: Arc::new(dispatcher.build()?),
            shutdown_grace: self.shutdown_grace,
        })
    }
}
