//! In-process record of dead-lettered deliveries.
//!
//! The broker's dead-letter exchange holds the messages themselves; this queue
//! keeps a bounded local record of what was dead-lettered and why, for health
//! checks and inspection.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Dead letter queue entry
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The dead-lettered payload
    pub payload: T,

    /// Number of processing attempts made
    pub attempts: u32,

    /// Why the payload was dead-lettered
    pub reason: String,

    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Bounded, thread-safe FIFO of dead letters.
///
/// When full, the oldest entry is dropped. Clones share the same storage.
///
/// # Example
///
/// ```
/// use notifier_runtime::dead_letter::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("a", "handler failed", 3);
/// dlq.push("b", "handler failed", 3);
/// dlq.push("c", "malformed payload", 1);
///
/// let entries = dlq.drain();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[0].payload, "b");
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a new dead letter queue holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Record a dead letter, dropping the oldest entry if at capacity
    pub fn push(&self, payload: T, reason: impl Into<String>, attempts: u32) {
        let reason = reason.into();
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("notifier_dead_letters_dropped_total").increment(1);
            tracing::warn!(
                max_size = self.max_size,
                "Dead letter record queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            reason,
            recorded_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("notifier_dead_letters_recorded").set(queue.len() as f64);
    }

    /// Get the current queue size
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all entries, oldest first
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        metrics::gauge!("notifier_dead_letters_recorded").set(0.0);
        tracing::info!(count = entries.len(), "Drained dead letter record queue");

        entries
    }

    /// Oldest entry, without removing it
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Copy of all entries, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Get the maximum queue size
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}
