//! Delivery Dispatcher.
//!
//! Takes one raw [`Delivery`] at a time through
//! `Received → Decoding → Dispatched → {Acked | NackRequeued | Rejected}`:
//!
//! - no pattern in the metadata: route by a `{pattern, data}` body envelope if present
//! - no pattern, or no handler for it: reject without requeue, handler never called
//! - payload fails to decode: poison, reject without requeue
//! - handler succeeds: ack
//! - handler fails below `max_attempts`: nack with requeue
//! - handler fails at `max_attempts`: reject without requeue (dead-lettered)
//!
//! A panicking handler, or one that exceeds the configured timeout, counts as
//! a failed attempt. Settlement goes through [`InFlight`] so a delivery is
//! settled at most once even when drain races the handler.

use crate::dead_letter::DeadLetterQueue;
use crate::in_flight::InFlight;
use crate::metrics::DeliveryMetrics;
use crate::redelivery::RedeliveryTracker;
use futures::FutureExt;
use notifier_core::{
    BrokerChannel, ConfigError, ConnectionError, DecodeError, Delivery, DeliveryLifecycle, DeliveryState,
    DeliveryTag, Envelope, EventHandler, HandlerError, HandlerRegistry, JsonDecoder, Message, PayloadDecoder,
    Settlement, UnroutableError,
};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retry and concurrency settings for dispatch.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `concurrency`: 1 (strictly sequential, ordering-preserving)
/// - `handler_timeout`: none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Attempts before a failing message is dead-lettered
    pub max_attempts: u32,
    /// Deliveries processed at the same time
    pub concurrency: usize,
    /// Upper bound on a single handler invocation
    pub handler_timeout: Option<Duration>,
}

impl DispatchPolicy {
    /// Policy with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: 3,
            concurrency: 1,
            handler_timeout: None,
        }
    }

    /// Set the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the processing concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the handler timeout.
    #[must_use]
    pub const fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_attempts` or `concurrency` is
    /// zero, or the handler timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if self.handler_timeout == Some(Duration::ZERO) {
            return Err(invalid("handler_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a delivery was rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No route to a handler
    Unroutable(UnroutableError),
    /// Payload can never be processed
    Poison(DecodeError),
    /// Handler kept failing
    Exhausted {
        /// Attempts made, including the last
        attempts: u32,
        /// Error from the last attempt
        error: HandlerError,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unroutable(e) => write!(f, "unroutable: {e}"),
            Self::Poison(e) => write!(f, "poison: {e}"),
            Self::Exhausted { attempts, error } => write!(f, "exhausted after {attempts} attempts: {error}"),
        }
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler succeeded, delivery acknowledged
    Acked,
    /// Handler failed, delivery requeued for another attempt
    Requeued {
        /// The attempt that failed
        attempt: u32,
    },
    /// Delivery rejected without requeue
    Rejected {
        /// Why
        reason: RejectReason,
        /// Whether the broker routes it to a dead-letter exchange
        dead_lettered: bool,
    },
    /// Another path (drain) settled the delivery first
    Abandoned,
}

impl Outcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Requeued { .. } => "requeued",
            Self::Rejected { .. } => "rejected",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Routes deliveries to handlers and settles them by outcome.
pub struct DeliveryDispatcher {
    registry: Arc<HandlerRegistry>,
    decoder: Arc<dyn PayloadDecoder>,
    policy: DispatchPolicy,
    tracker: RedeliveryTracker,
    dead_letters: DeadLetterQueue<Delivery>,
    dead_letter_exchange: Option<String>,
}

impl DeliveryDispatcher {
    /// Create a builder over a populated registry.
    #[must_use]
    pub fn builder(registry: Arc<HandlerRegistry>) -> DeliveryDispatcherBuilder {
        DeliveryDispatcherBuilder {
            registry,
            decoder: Arc::new(JsonDecoder),
            policy: DispatchPolicy::default(),
            dead_letter_exchange: None,
            dead_letter_capacity: 1000,
            tracker_capacity: 10_000,
        }
    }

    /// Dispatch settings.
    #[must_use]
    pub const fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// In-process record of dead-lettered deliveries.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<Delivery> {
        self.dead_letters.clone()
    }

    /// Attempt bookkeeping.
    #[must_use]
    pub const fn tracker(&self) -> &RedeliveryTracker {
        &self.tracker
    }

    /// Process one delivery and settle it.
    ///
    /// The delivery's tag must already be tracked in `in_flight`. If the tag
    /// has been claimed by someone else by the time the handler returns, the
    /// delivery is left alone and [`Outcome::Abandoned`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the settlement could not be sent; the
    /// broker redelivers the message once the channel is gone.
    #[tracing::instrument(
        skip_all,
        fields(
            tag = %delivery.tag,
            pattern = delivery.pattern.as_deref().unwrap_or(""),
            redelivered = delivery.redelivered,
        )
    )]
    pub async fn dispatch(
        &self,
        channel: &dyn BrokerChannel,
        in_flight: &InFlight,
        delivery: Delivery,
    ) -> Result<Outcome, ConnectionError> {
        let mut lifecycle = DeliveryLifecycle::received(delivery.tag);

        let (pattern, handler, envelope) = match self.route(&delivery) {
            Ok(route) => route,
            Err(e) => {
                let reason = RejectReason::Unroutable(e);
                return self.reject(channel, in_flight, &mut lifecycle, delivery, reason, 1).await;
            },
        };

        advance(&mut lifecycle, DeliveryState::Decoding);
        let decoded = match envelope {
            Some(envelope) => Ok(envelope.data),
            None => self.decoder.decode(delivery.content_type.as_deref(), &delivery.payload),
        };
        let payload = match decoded {
            Ok(payload) => payload,
            Err(e) => {
                let attempt = self.tracker.attempt(&delivery);
                let reason = RejectReason::Poison(e);
                return self.reject(channel, in_flight, &mut lifecycle, delivery, reason, attempt).await;
            },
        };

        let attempt = self.tracker.attempt(&delivery);
        let message = Message::from_delivery(&delivery, pattern, payload, attempt);

        advance(&mut lifecycle, DeliveryState::Dispatched);
        let started = Instant::now();
        let result = self.invoke(handler.as_ref(), &message).await;
        DeliveryMetrics::record_handler(started.elapsed(), result.is_err());

        match result {
            Ok(()) => {
                let settled = self
                    .settle(channel, in_flight, delivery.tag, &mut lifecycle, Settlement::Ack, DeliveryState::Acked)
                    .await?;
                if !settled {
                    return Ok(Outcome::Abandoned);
                }
                self.tracker.settled(&delivery);
                DeliveryMetrics::record_outcome("acked");
                tracing::info!(attempt, "Delivery acknowledged");
                Ok(Outcome::Acked)
            },
            Err(HandlerError::Decode(e)) => {
                let reason = RejectReason::Poison(e);
                self.reject(channel, in_flight, &mut lifecycle, delivery, reason, attempt).await
            },
            Err(error) if attempt >= self.policy.max_attempts => {
                let reason = RejectReason::Exhausted { attempts: attempt, error };
                self.reject(channel, in_flight, &mut lifecycle, delivery, reason, attempt).await
            },
            Err(error) => {
                self.tracker.record_failure(&delivery);
                let requeue = Settlement::Nack { requeue: true };
                let settled = self
                    .settle(channel, in_flight, delivery.tag, &mut lifecycle, requeue, DeliveryState::NackRequeued)
                    .await?;
                if !settled {
                    return Ok(Outcome::Abandoned);
                }
                DeliveryMetrics::record_outcome("requeued");
                tracing::warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %error,
                    "Handler failed, delivery requeued"
                );
                Ok(Outcome::Requeued { attempt })
            },
        }
    }

    /// Pattern and handler for a delivery, plus the envelope when the pattern
    /// came from the body.
    fn route(&self, delivery: &Delivery) -> RouteResult {
        if let Some(pattern) = delivery.pattern.as_deref().filter(|p| !p.is_empty()) {
            return Ok((pattern.to_string(), self.resolve(pattern)?, None));
        }

        let envelope = self
            .decoder
            .decode(delivery.content_type.as_deref(), &delivery.payload)
            .ok()
            .and_then(Envelope::from_value)
            .ok_or(UnroutableError::MissingPattern)?;
        let handler = self.resolve(&envelope.pattern)?;
        Ok((envelope.pattern.clone(), handler, Some(envelope)))
    }

    fn resolve(&self, pattern: &str) -> Result<Arc<dyn EventHandler>, UnroutableError> {
        self.registry
            .resolve(pattern)
            .ok_or_else(|| UnroutableError::NoHandler(pattern.to_string()))
    }

    async fn invoke(&self, handler: &dyn EventHandler, message: &Message) -> Result<(), HandlerError> {
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
            Ok(future) => future,
            Err(panic) => return Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        };
        let guarded = AssertUnwindSafe(future).catch_unwind();

        let outcome = match self.policy.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(HandlerError::Timeout(limit)),
            },
            None => guarded.await,
        };

        outcome.unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))))
    }

    async fn settle(
        &self,
        channel: &dyn BrokerChannel,
        in_flight: &InFlight,
        tag: DeliveryTag,
        lifecycle: &mut DeliveryLifecycle,
        settlement: Settlement,
        next: DeliveryState,
    ) -> Result<bool, ConnectionError> {
        if !in_flight.claim(tag) {
            tracing::debug!(%settlement, "Delivery already settled by drain, skipping");
            return Ok(false);
        }
        advance(lifecycle, next);
        channel.settle(tag, settlement).await?;
        Ok(true)
    }

    async fn reject(
        &self,
        channel: &dyn BrokerChannel,
        in_flight: &InFlight,
        lifecycle: &mut DeliveryLifecycle,
        delivery: Delivery,
        reason: RejectReason,
        attempts: u32,
    ) -> Result<Outcome, ConnectionError> {
        let reject = Settlement::Reject { requeue: false };
        if !self
            .settle(channel, in_flight, delivery.tag, lifecycle, reject, DeliveryState::Rejected)
            .await?
        {
            return Ok(Outcome::Abandoned);
        }

        self.tracker.settled(&delivery);
        let dead_lettered = self.dead_letter_exchange.is_some();

        match &reason {
            RejectReason::Unroutable(_) => {
                DeliveryMetrics::record_outcome("unroutable");
                tracing::warn!(reason = %reason, dead_lettered, "Unroutable delivery rejected");
            },
            RejectReason::Poison(_) => {
                DeliveryMetrics::record_outcome("poison");
                tracing::warn!(reason = %reason, dead_lettered, "Poison delivery rejected");
                self.dead_letters.push(delivery, reason.to_string(), attempts);
            },
            RejectReason::Exhausted { .. } => {
                DeliveryMetrics::record_outcome("dead_lettered");
                tracing::error!(reason = %reason, dead_lettered, "Delivery exhausted its attempts, rejected");
                self.dead_letters.push(delivery, reason.to_string(), attempts);
            },
        }

        Ok(Outcome::Rejected { reason, dead_lettered })
    }
}

impl fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("dead_letter_exchange", &self.dead_letter_exchange)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DeliveryDispatcher`].
pub struct DeliveryDispatcherBuilder {
    registry: Arc<HandlerRegistry>,
    decoder: Arc<dyn PayloadDecoder>,
    policy: DispatchPolicy,
    dead_letter_exchange: Option<String>,
    dead_letter_capacity: usize,
    tracker_capacity: usize,
}

impl DeliveryDispatcherBuilder {
    /// Replace the JSON decoder.
    #[must_use]
    pub fn decoder<D: PayloadDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Use an already shared decoder.
    #[must_use]
    pub fn shared_decoder(mut self, decoder: Arc<dyn PayloadDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Set the dispatch policy.
    #[must_use]
    pub const fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name the broker dead-letter exchange rejected deliveries are routed to.
    #[must_use]
    pub fn dead_letter_exchange(mut self, exchange: Option<String>) -> Self {
        self.dead_letter_exchange = exchange;
        self
    }

    /// Size of the in-process dead letter record queue.
    #[must_use]
    pub const fn dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    /// Number of messages the redelivery tracker remembers.
    #[must_use]
    pub const fn tracker_capacity(mut self, capacity: usize) -> Self {
        self.tracker_capacity = capacity;
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the policy is invalid.
    pub fn build(self) -> Result<DeliveryDispatcher, ConfigError> {
        self.policy.validate()?;
        if self.registry.is_empty() {
            tracing::warn!("Dispatcher built with an empty handler registry; every delivery will be rejected");
        }

        Ok(DeliveryDispatcher {
            registry: self.registry,
            decoder: self.decoder,
            policy: self.policy,
            tracker: RedeliveryTracker::new(self.tracker_capacity),
            dead_letters: DeadLetterQueue::new(self.dead_letter_capacity),
            dead_letter_exchange: self.dead_letter_exchange,
        })
    }
}

type RouteResult = Result<(String, Arc<dyn EventHandler>, Option<Envelope>), UnroutableError>;

fn advance(lifecycle: &mut DeliveryLifecycle, next: DeliveryState) {
    if let Err(e) = lifecycle.advance(next) {
        tracing::error!(error = %e, "Delivery state machine violated");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
