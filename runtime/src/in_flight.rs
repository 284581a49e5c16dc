//! At-most-once settlement guard.
//!
//! Every delivery tag is tracked when it is received and claimed exactly once
//! by whichever path settles it: the dispatcher after the handler returns, or
//! the drain path requeueing what is left. Whoever loses the claim must not
//! touch the broker for that tag.
//!
//! Tags are scoped to a channel, so a fresh set is used per channel.

use crate::metrics::DeliveryMetrics;
use notifier_core::DeliveryTag;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of received but unsettled delivery tags. Clones share the set.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    tags: Arc<Mutex<BTreeSet<DeliveryTag>>>,
}

impl InFlight {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a received tag. Returns `false` if already tracked.
    pub fn track(&self, tag: DeliveryTag) -> bool {
        let mut tags = self.lock();
        let inserted = tags.insert(tag);
        DeliveryMetrics::record_in_flight(tags.len());
        inserted
    }

    /// Claim the right to settle `tag`. Returns `false` if it was already
    /// claimed or never tracked.
    pub fn claim(&self, tag: DeliveryTag) -> bool {
        let mut tags = self.lock();
        let claimed = tags.remove(&tag);
        DeliveryMetrics::record_in_flight(tags.len());
        claimed
    }

    /// Claim every remaining tag, lowest first.
    pub fn claim_all(&self) -> Vec<DeliveryTag> {
        let mut tags = self.lock();
        let claimed = std::mem::take(&mut *tags).into_iter().collect();
        DeliveryMetrics::record_in_flight(0);
        claimed
    }

    /// Whether `tag` is tracked and unclaimed.
    #[must_use]
    pub fn contains(&self, tag: DeliveryTag) -> bool {
        self.lock().contains(&tag)
    }

    /// Number of unsettled tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether every tracked tag has been claimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<DeliveryTag>> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
