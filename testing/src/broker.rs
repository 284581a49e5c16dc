//! In-memory AMQP-like broker for fast, deterministic tests.
//!
//! Emulates the broker behavior the consumer relies on:
//!
//! - exchanges (fanout, direct, topic), queues and bindings with idempotent,
//!   attribute-checked declarations
//! - per-channel delivery tags, prefetch windows and unacknowledged deliveries
//! - requeue on nack, dead-letter routing on reject, redelivery with
//!   `redelivered = true` when a channel closes with unacknowledged messages
//! - settling an unknown tag is a channel error, as on a real broker
//!
//! Fault injection: refuse connections, mark URLs unreachable or black-holed,
//! drop every open connection, ignore the prefetch window.

use crate::message::TestMessage;
use notifier_core::{
    BindError, Broker, BrokerChannel, BrokerFuture, ConnectionError, Delivery, DeliveryStream, DeliveryTag,
    ExchangeKind, ExchangeSpec, QueueSpec, Settlement,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// One settlement observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    /// Channel the delivery was made on
    pub channel: u64,
    /// Delivery tag
    pub tag: DeliveryTag,
    /// How it was settled
    pub settlement: Settlement,
    /// Queue the message came from
    pub queue: String,
    /// Publisher message id
    pub message_id: Option<String>,
    /// Payload
    pub payload: Vec<u8>,
    /// Whether this delivery was a redelivery
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

#[derive(Debug, Clone)]
struct Stored {
    message: TestMessage,
    exchange: String,
    routing_key: String,
    redelivered: bool,
    deliveries: u32,
}

#[derive(Debug)]
struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<Stored>,
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: String,
    queue: String,
    tx: mpsc::UnboundedSender<Result<Delivery, ConnectionError>>,
}

#[derive(Debug)]
struct ChannelState {
    open: bool,
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<u64, (String, Stored)>,
    consumers: Vec<ConsumerSlot>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, QueueState>,
    bindings: BTreeSet<Binding>,
    channels: BTreeMap<u64, ChannelState>,
    next_channel: u64,
    connect_attempts: usize,
    fail_next_connects: usize,
    unreachable: HashSet<String>,
    black_holed: HashSet<String>,
    delivery_counts: bool,
    ignore_prefetch: bool,
    settlements: Vec<SettlementRecord>,
    protocol_errors: Vec<String>,
}

/// In-memory broker. Clones share the same broker.
///
/// # Example
///
/// ```
/// use notifier_testing::{InMemoryBroker, TestMessage};
/// use notifier_core::{Broker, ExchangeSpec, QueueSpec};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let channel = broker.connect("amqp://in-memory").await?;
/// channel.declare_exchange(&ExchangeSpec::fanout("posts")).await?;
/// channel.declare_queue(&QueueSpec::new("notifications")).await?;
/// channel.bind_queue("notifications", "posts", "").await?;
///
/// broker.publish("posts", "", TestMessage::new("post.created", r#"{"id":42}"#));
/// assert_eq!(broker.ready_count("notifications"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a broker-maintained delivery count to redeliveries, as quorum
    /// queues do with `x-delivery-count`.
    #[must_use]
    pub fn with_delivery_counts(self) -> Self {
        self.lock().delivery_counts = true;
        self
    }

    /// Deliver past the prefetch window set with `basic.qos`.
    #[must_use]
    pub fn ignoring_prefetch(self) -> Self {
        self.lock().ignore_prefetch = true;
        self
    }

    /// Never answer connection attempts to `url`, as with a host that drops
    /// every SYN.
    pub fn black_hole(&self, url: impl Into<String>) {
        self.lock().black_holed.insert(url.into());
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().fail_next_connects = count;
    }

    /// Refuse connections to `url` until [`mark_reachable`](Self::mark_reachable).
    pub fn mark_unreachable(&self, url: impl Into<String>) {
        self.lock().unreachable.insert(url.into());
    }

    /// Accept connections to `url` again.
    pub fn mark_reachable(&self, url: &str) {
        self.lock().unreachable.remove(url);
    }

    /// Drop every open connection, as a network failure would.
    ///
    /// Consumers receive an error and their streams end; unacknowledged
    /// messages return to their queues marked redelivered.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let open: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, ch)| ch.open)
            .map(|(id, _)| *id)
            .collect();
        for id in open {
            close_channel(
                &mut state,
                id,
                Some(ConnectionError::Lost("connection reset by peer".to_string())),
            );
        }
    }

    /// Publish a message. Returns the number of queues it was routed to.
    ///
    /// An empty exchange name routes directly to the queue named by
    /// `routing_key`.
    pub fn publish(&self, exchange: &str, routing_key: &str, message: TestMessage) -> usize {
        let mut state = self.lock();
        let stored = Stored {
            message,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            redelivered: false,
            deliveries: 0,
        };
        let routed = route(&mut state, exchange, routing_key, &stored);
        pump(&mut state);
        routed
    }

    /// Messages waiting in a queue, not yet delivered.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Delivered but unsettled messages from a queue, across all channels.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock()
            .channels
            .values()
            .flat_map(|ch| ch.unacked.values())
            .filter(|(q, _)| q == queue)
            .count()
    }

    /// Payloads waiting in a queue.
    #[must_use]
    pub fn ready_messages(&self, queue: &str) -> Vec<TestMessage> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|s| s.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Every settlement observed, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.lock().settlements.clone()
    }

    /// Settlements of the message with the given id, in order.
    #[must_use]
    pub fn settlements_for(&self, message_id: &str) -> Vec<Settlement> {
        self.lock()
            .settlements
            .iter()
            .filter(|r| r.message_id.as_deref() == Some(message_id))
            .map(|r| r.settlement)
            .collect()
    }

    /// Channel errors raised by protocol misuse, such as settling an unknown tag.
    #[must_use]
    pub fn protocol_errors(&self) -> Vec<String> {
        self.lock().protocol_errors.clone()
    }

    /// Number of connection attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Number of open channels.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.lock().channels.values().filter(|ch| ch.open).count()
    }

    /// Number of consumers on a queue.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .channels
            .values()
            .filter(|ch| ch.open)
            .flat_map(|ch| ch.consumers.iter())
            .filter(|c| c.queue == queue)
            .count()
    }

    /// Declared exchange, if any.
    #[must_use]
    pub fn exchange(&self, name: &str) -> Option<ExchangeSpec> {
        self.lock().exchanges.get(name).cloned()
    }

    /// Declared queue, if any.
    #[must_use]
    pub fn queue(&self, name: &str) -> Option<QueueSpec> {
        self.lock().queues.get(name).map(|q| q.spec.clone())
    }

    /// Number of queues declared.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Bindings as `(exchange, queue, routing_key)`, sorted.
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.lock()
            .bindings
            .iter()
            .map(|b| (b.exchange.clone(), b.queue.clone(), b.routing_key.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_channel(&self, url: &str) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.unreachable.contains(url) {
            return Err(ConnectionError::ConnectFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(ConnectionError::ConnectFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(
            id,
            ChannelState {
                open: true,
                prefetch: 0,
                next_tag: 1,
                unacked: BTreeMap::new(),
                consumers: Vec::new(),
            },
        );

        Ok(Arc::new(InMemoryChannel {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

impl Broker for InMemoryBroker {
    fn connect<'a>(&'a self, url: &'a str) -> BrokerFuture<'a, Result<Arc<dyn BrokerChannel>, ConnectionError>> {
        {
            let mut state = self.lock();
            if state.black_holed.contains(url) {
                state.connect_attempts += 1;
                return Box::pin(std::future::pending());
            }
        }
        Box::pin(ready(self.open_channel(url)))
    }
}

/// Channel on an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryChannel {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryChannel {
    /// Channel id, as recorded in [`SettlementRecord::channel`].
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_open(state: &BrokerState, id: u64) -> Result<(), BindError> {
        if state.channels.get(&id).is_some_and(|ch| ch.open) {
            Ok(())
        } else {
            Err(BindError::NotConnected)
        }
    }

    fn do_declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BindError> {
        let mut state = self.lock();
        Self::require_open(&state, self.id)?;
        if spec.is_default() {
            return Ok(());
        }

        match state.exchanges.get(&spec.name) {
            Some(existing) if existing.kind != spec.kind || existing.durable != spec.durable => {
                Err(BindError::ExchangeDeclare {
                    exchange: spec.name.clone(),
                    reason: format!(
                        "PRECONDITION_FAILED - inequivalent arg: exists as {} durable={}",
                        existing.kind, existing.durable
                    ),
                })
            },
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(spec.name.clone(), spec.clone());
                Ok(())
            },
        }
    }

    fn do_declare_queue(&self, spec: &QueueSpec) -> Result<(), BindError> {
        let mut state = self.lock();
        Self::require_open(&state, self.id)?;

        match state.queues.get(&spec.name) {
            Some(existing)
                if existing.spec.durable != spec.durable
                    || existing.spec.auto_delete != spec.auto_delete
                    || existing.spec.dead_letter_exchange != spec.dead_letter_exchange =>
            {
                Err(BindError::QueueDeclare {
                    queue: spec.name.clone(),
                    reason: "PRECONDITION_FAILED - inequivalent arg".to_string(),
                })
            },
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    spec.name.clone(),
                    QueueState {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                    },
                );
                Ok(())
            },
        }
    }

    fn do_bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BindError> {
        let mut state = self.lock();
        Self::require_open(&state, self.id)?;

        let missing = if !state.exchanges.contains_key(exchange) {
            Some(format!("NOT_FOUND - no exchange '{exchange}'"))
        } else if !state.queues.contains_key(queue) {
            Some(format!("NOT_FOUND - no queue '{queue}'"))
        } else {
            None
        };
        if let Some(reason) = missing {
            return Err(BindError::QueueBind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason,
            });
        }

        state.bindings.insert(Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    fn do_set_prefetch(&self, prefetch: u16) -> Result<(), BindError> {
        let mut state = self.lock();
        Self::require_open(&state, self.id)?;
        if let Some(ch) = state.channels.get_mut(&self.id) {
            ch.prefetch = prefetch;
        }
        pump(&mut state);
        Ok(())
    }

    fn do_consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BindError> {
        let mut state = self.lock();
        Self::require_open(&state, self.id)?;

        if !state.queues.contains_key(queue) {
            return Err(BindError::Consume {
                queue: queue.to_string(),
                reason: format!("NOT_FOUND - no queue '{queue}'"),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(ch) = state.channels.get_mut(&self.id) {
            if ch.consumers.iter().any(|c| c.tag == consumer_tag) {
                return Err(BindError::Consume {
                    queue: queue.to_string(),
                    reason: format!("NOT_ALLOWED - attempt to reuse consumer tag '{consumer_tag}'"),
                });
            }
            ch.consumers.push(ConsumerSlot {
                tag: consumer_tag.to_string(),
                queue: queue.to_string(),
                tx,
            });
        }
        pump(&mut state);

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    fn do_cancel(&self, consumer_tag: &str) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        let Some(ch) = state.channels.get_mut(&self.id).filter(|ch| ch.open) else {
            return Err(ConnectionError::Channel("channel is closed".to_string()));
        };

        let mut cancelled = Vec::new();
        ch.consumers.retain(|c| {
            if c.tag == consumer_tag {
                cancelled.push(c.queue.clone());
                false
            } else {
                true
            }
        });
        for queue in cancelled {
            delete_if_unused(&mut state, &queue);
        }
        Ok(())
    }

    fn do_settle(&self, tag: DeliveryTag, settlement: Settlement) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        let Some(ch) = state.channels.get_mut(&self.id).filter(|ch| ch.open) else {
            return Err(ConnectionError::Channel("channel is closed".to_string()));
        };

        let Some((queue, mut stored)) = ch.unacked.remove(&tag.value()) else {
            let reason = format!("PRECONDITION_FAILED - unknown delivery tag {tag}");
            state.protocol_errors.push(reason.clone());
            close_channel(&mut state, self.id, Some(ConnectionError::Channel(reason.clone())));
            return Err(ConnectionError::Channel(reason));
        };

        state.settlements.push(SettlementRecord {
            channel: self.id,
            tag,
            settlement,
            queue: queue.clone(),
            message_id: stored.message.message_id.clone(),
            payload: stored.message.payload.clone(),
            redelivered: stored.redelivered,
        });

        match settlement {
            Settlement::Ack => {},
            Settlement::Nack { requeue: true } | Settlement::Reject { requeue: true } => {
                stored.redelivered = true;
                if let Some(q) = state.queues.get_mut(&queue) {
                    q.ready.push_front(stored);
                }
            },
            Settlement::Nack { requeue: false } | Settlement::Reject { requeue: false } => {
                let dlx = state
                    .queues
                    .get(&queue)
                    .and_then(|q| q.spec.dead_letter_exchange.clone());
                if let Some(dlx) = dlx {
                    let routing_key = stored.routing_key.clone();
                    stored.redelivered = false;
                    stored.deliveries = 0;
                    route(&mut state, &dlx, &routing_key, &stored);
                }
            },
        }

        pump(&mut state);
        Ok(())
    }

    fn do_close(&self) {
        let mut state = self.lock();
        close_channel(&mut state, self.id, None);
    }
}

impl BrokerChannel for InMemoryChannel {
    fn declare_exchange<'a>(&'a self, spec: &'a ExchangeSpec) -> BrokerFuture<'a, Result<(), BindError>> {
        Box::pin(ready(self.do_declare_exchange(spec)))
    }

    fn declare_queue<'a>(&'a self, spec: &'a QueueSpec) -> BrokerFuture<'a, Result<(), BindError>> {
        Box::pin(ready(self.do_declare_queue(spec)))
    }

    fn bind_queue<'a>(
        &'a self,
        queue: &'a str,
        exchange: &'a str,
        routing_key: &'a str,
    ) -> BrokerFuture<'a, Result<(), BindError>> {
        Box::pin(ready(self.do_bind_queue(queue, exchange, routing_key)))
    }

    fn set_prefetch(&self, prefetch: u16) -> BrokerFuture<'_, Result<(), BindError>> {
        Box::pin(ready(self.do_set_prefetch(prefetch)))
    }

    fn consume<'a>(&'a self, queue: &'a str, consumer_tag: &'a str) -> BrokerFuture<'a, Result<DeliveryStream, BindError>> {
        Box::pin(ready(self.do_consume(queue, consumer_tag)))
    }

    fn cancel<'a>(&'a self, consumer_tag: &'a str) -> BrokerFuture<'a, Result<(), ConnectionError>> {
        Box::pin(ready(self.do_cancel(consumer_tag)))
    }

    fn settle(&self, tag: DeliveryTag, settlement: Settlement) -> BrokerFuture<'_, Result<(), ConnectionError>> {
        Box::pin(ready(self.do_settle(tag, settlement)))
    }

    fn close(&self) -> BrokerFuture<'_, Result<(), ConnectionError>> {
        self.do_close();
        Box::pin(ready(Ok(())))
    }

    fn is_open(&self) -> bool {
        self.lock().channels.get(&self.id).is_some_and(|ch| ch.open)
    }
}

/// Route a message through an exchange to its bound queues.
fn route(state: &mut BrokerState, exchange: &str, routing_key: &str, stored: &Stored) -> usize {
    let targets: Vec<String> = if exchange.is_empty() {
        if state.queues.contains_key(routing_key) {
            vec![routing_key.to_string()]
        } else {
            Vec::new()
        }
    } else if let Some(spec) = state.exchanges.get(exchange) {
        let mut targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && binding_matches(spec.kind, &b.routing_key, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        targets.dedup();
        targets
    } else {
        Vec::new()
    };

    for queue in &targets {
        if let Some(q) = state.queues.get_mut(queue) {
            q.ready.push_back(stored.clone());
        }
    }
    targets.len()
}

fn binding_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = binding_key.split('.').collect();
            let words: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &words)
        },
    }
}

fn topic_matches(pattern: &[&str], words: &[&str]) -> bool {
    match (pattern.split_first(), words.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, words) || words.split_first().is_some_and(|(_, tail)| topic_matches(pattern, tail))
        },
        (Some((&"*", rest)), Some((_, tail))) => topic_matches(rest, tail),
        (Some((p, rest)), Some((w, tail))) if p == w => topic_matches(rest, tail),
        _ => false,
    }
}

/// Hand ready messages to consumers with room in their prefetch window.
fn pump(state: &mut BrokerState) {
    let BrokerState {
        channels,
        queues,
        delivery_counts,
        ignore_prefetch,
        ..
    } = state;

    for (channel_id, ch) in channels.iter_mut().filter(|(_, ch)| ch.open) {
        let mut dead_consumers = Vec::new();

        for (index, consumer) in ch.consumers.iter().enumerate() {
            let Some(queue) = queues.get_mut(&consumer.queue) else {
                continue;
            };

            loop {
                if !*ignore_prefetch && ch.prefetch > 0 && ch.unacked.len() >= usize::from(ch.prefetch) {
                    break;
                }
                let Some(mut stored) = queue.ready.pop_front() else {
                    break;
                };

                let tag = ch.next_tag;
                let delivery = to_delivery(tag, &stored, *delivery_counts);
                if consumer.tx.send(Ok(delivery)).is_err() {
                    queue.ready.push_front(stored);
                    dead_consumers.push(index);
                    break;
                }

                tracing::trace!(channel = channel_id, tag, queue = %consumer.queue, "Delivered");
                ch.next_tag += 1;
                stored.deliveries += 1;
                ch.unacked.insert(tag, (consumer.queue.clone(), stored));
            }
        }

        for index in dead_consumers.into_iter().rev() {
            ch.consumers.remove(index);
        }
    }
}

fn to_delivery(tag: u64, stored: &Stored, delivery_counts: bool) -> Delivery {
    let message = &stored.message;
    let mut delivery = Delivery::new(DeliveryTag::new(tag), message.payload.clone())
        .with_redelivered(stored.redelivered)
        .with_route(stored.exchange.clone(), stored.routing_key.clone());

    if let Some(pattern) = &message.pattern {
        delivery = delivery.with_pattern(pattern.clone());
    }
    if let Some(id) = &message.message_id {
        delivery = delivery.with_message_id(id.clone());
    }
    if let Some(content_type) = &message.content_type {
        delivery = delivery.with_content_type(content_type.clone());
    }
    for (key, value) in &message.headers {
        delivery = delivery.with_header(key.clone(), value.clone());
    }
    if delivery_counts && stored.deliveries > 0 {
        delivery = delivery.with_delivery_count(stored.deliveries);
    }
    delivery
}

/// Close a channel: requeue its unacknowledged messages in order, end its
/// consumers' streams (after `error`, if given) and clean up auto-delete queues.
fn close_channel(state: &mut BrokerState, id: u64, error: Option<ConnectionError>) {
    let Some(ch) = state.channels.get_mut(&id) else {
        return;
    };
    if !ch.open {
        return;
    }
    ch.open = false;

    let unacked = std::mem::take(&mut ch.unacked);
    let consumers = std::mem::take(&mut ch.consumers);

    for (queue, mut stored) in unacked.into_values().rev() {
        stored.redelivered = true;
        if let Some(q) = state.queues.get_mut(&queue) {
            q.ready.push_front(stored);
        }
    }

    let mut queues = Vec::new();
    for consumer in consumers {
        if let Some(error) = &error {
            let _ = consumer.tx.send(Err(error.clone()));
        }
        queues.push(consumer.queue);
    }
    for queue in queues {
        delete_if_unused(state, &queue);
    }

    pump(state);
}

fn delete_if_unused(state: &mut BrokerState, queue: &str) {
    let auto_delete = state.queues.get(queue).is_some_and(|q| q.spec.auto_delete);
    let in_use = state
        .channels
        .values()
        .filter(|ch| ch.open)
        .flat_map(|ch| ch.consumers.iter())
        .any(|c| c.queue == queue);

    if auto_delete && !in_use {
        state.queues.remove(queue);
        state.bindings.retain(|b| b.queue != queue);
        tracing::debug!(queue, "Auto-delete queue removed");
    }
}
