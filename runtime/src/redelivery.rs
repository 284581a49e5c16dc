//! Attempt counting across redeliveries.
//!
//! The broker assigns a new delivery tag every time it redelivers a message,
//! so failures are counted per [`DeliveryKey`] instead. A broker-maintained
//! delivery count, when present, takes precedence and nothing is stored.
//!
//! Without a message id the key is a digest of pattern and payload, which two
//! separate publishes of the same body share. Only redeliveries read the
//! local count: a first delivery is always attempt 1 and its first failure
//! restarts the count for that key.

use notifier_core::{Delivery, DeliveryKey};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Failures {
    counts: HashMap<DeliveryKey, u32>,
    order: VecDeque<DeliveryKey>,
}

/// Bounded map from message identity to failed attempts.
///
/// When full, the oldest tracked message is forgotten; a forgotten message
/// starts counting from scratch on its next redelivery.
#[derive(Debug)]
pub struct RedeliveryTracker {
    failures: Mutex<Failures>,
    capacity: usize,
}

impl RedeliveryTracker {
    /// Create a tracker remembering at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            failures: Mutex::new(Failures::default()),
            capacity: capacity.max(1),
        }
    }

    /// 1-based attempt number for this delivery.
    #[must_use]
    pub fn attempt(&self, delivery: &Delivery) -> u32 {
        if let Some(count) = delivery.delivery_count {
            return count.saturating_add(1);
        }
        if !delivery.redelivered {
            return 1;
        }
        self.failures(&delivery.key()).saturating_add(1)
    }

    /// Failures recorded for a message.
    #[must_use]
    pub fn failures(&self, key: &DeliveryKey) -> u32 {
        self.lock().counts.get(key).copied().unwrap_or(0)
    }

    /// Record a failed attempt of `delivery` and return its failure count.
    pub fn record_failure(&self, delivery: &Delivery) -> u32 {
        if let Some(count) = delivery.delivery_count {
            return count.saturating_add(1);
        }

        let key = delivery.key();
        let mut failures = self.lock();

        if let Some(count) = failures.counts.get_mut(&key) {
            *count = if delivery.redelivered { count.saturating_add(1) } else { 1 };
            return *count;
        }

        if failures.counts.len() >= self.capacity {
            if let Some(oldest) = failures.order.pop_front() {
                failures.counts.remove(&oldest);
                tracing::debug!(key = %oldest, "Redelivery tracker full, forgetting oldest message");
            }
        }

        failures.counts.insert(key.clone(), 1);
        failures.order.push_back(key);
        1
    }

    /// Forget `delivery` once it reached a terminal state.
    ///
    /// A first delivery never owns an entry, so settling it leaves any count
    /// kept for an identical message untouched.
    pub fn settled(&self, delivery: &Delivery) {
        if delivery.redelivered && delivery.delivery_count.is_none() {
            self.clear(&delivery.key());
        }
    }

    /// Forget a message.
    pub fn clear(&self, key: &DeliveryKey) {
        let mut failures = self.lock();
        if failures.counts.remove(key).is_some() {
            failures.order.retain(|k| k != key);
        }
    }

    /// Number of messages being tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().counts.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RedeliveryTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifier_core::DeliveryTag;

    fn delivery(tag: u64, payload: &str) -> Delivery {
        Delivery::new(DeliveryTag::new(tag), payload.as_bytes().to_vec()).with_pattern("post.created")
    }

    #[test]
    fn counts_follow_the_message_not_the_tag() {
        let tracker = RedeliveryTracker::default();
        let first = delivery(1, r#"{"id":1}"#);
        assert_eq!(tracker.attempt(&first), 1);

        assert_eq!(tracker.record_failure(&first), 1);
        let redelivered = delivery(9, r#"{"id":1}"#).with_redelivered(true);
        assert_eq!(tracker.attempt(&redelivered), 2);
        assert_eq!(tracker.record_failure(&redelivered), 2);
        assert_eq!(tracker.attempt(&redelivered), 3);

        let unrelated = delivery(10, r#"{"id":2}"#).with_redelivered(true);
        assert_eq!(tracker.attempt(&unrelated), 1);
    }

    #[test]
    fn identical_first_deliveries_start_at_attempt_one() {
        let tracker = RedeliveryTracker::default();
        let a = delivery(1, r#"{"id":1}"#);
        tracker.record_failure(&a);
        tracker.record_failure(&delivery(2, r#"{"id":1}"#).with_redelivered(true));

        let b = delivery(3, r#"{"id":1}"#);
        assert_eq!(tracker.attempt(&b), 1);

        // B's first failure restarts the shared count instead of adding to it.
        assert_eq!(tracker.record_failure(&b), 1);
        assert_eq!(tracker.attempt(&delivery(4, r#"{"id":1}"#).with_redelivered(true)), 2);
    }

    #[test]
    fn settling_a_first_delivery_keeps_the_shared_count() {
        let tracker = RedeliveryTracker::default();
        let failing = delivery(1, r#"{"id":1}"#);
        tracker.record_failure(&failing);

        tracker.settled(&delivery(2, r#"{"id":1}"#));
        assert_eq!(tracker.failures(&failing.key()), 1);

        tracker.settled(&delivery(3, r#"{"id":1}"#).with_redelivered(true));
        assert!(tracker.is_empty());
    }

    #[test]
    fn broker_count_takes_precedence() {
        let tracker = RedeliveryTracker::default();
        let d = delivery(1, "x").with_delivery_count(4).with_redelivered(true);
        assert_eq!(tracker.record_failure(&d), 5);
        assert_eq!(tracker.attempt(&d), 5);
        assert!(tracker.is_empty());
    }

    #[test]
    fn clear_forgets_terminal_messages() {
        let tracker = RedeliveryTracker::default();
        let d = delivery(1, "x").with_redelivered(true);
        tracker.record_failure(&d);
        tracker.record_failure(&d);
        assert_eq!(tracker.failures(&d.key()), 2);

        tracker.clear(&d.key());
        assert_eq!(tracker.failures(&d.key()), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn bounded_by_capacity() {
        let tracker = RedeliveryTracker::new(2);
        let a = delivery(1, "a");
        let b = delivery(2, "b");
        let c = delivery(3, "c");

        tracker.record_failure(&a);
        tracker.record_failure(&b);
        tracker.record_failure(&c);

        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.failures(&a.key()), 0);
        assert_eq!(tracker.failures(&c.key()), 1);
    }
}
