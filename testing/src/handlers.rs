//! Handlers that record what they were given.

use notifier_core::{DecodeError, EventHandler, HandlerError, HandlerFuture, Message};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail,
    FailFirst(usize),
    Panic,
    Sleep(Duration),
    SleepUnlessRedelivered(Duration),
    RejectPayload,
}

/// Handler that records every message it receives and responds according to
/// a scripted behavior.
///
/// Clones share the same record.
///
/// # Example
///
/// ```
/// use notifier_testing::RecordingHandler;
///
/// let handler = RecordingHandler::failing_first(2);
/// assert_eq!(handler.call_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct RecordingHandler {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<Message>>>,
    in_progress: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl RecordingHandler {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_progress: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_behavior(Behavior::Succeed)
    }

    /// Always fails with a retryable error.
    #[must_use]
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail)
    }

    /// Fails the first `failures` calls, then succeeds.
    #[must_use]
    pub fn failing_first(failures: usize) -> Self {
        Self::with_behavior(Behavior::FailFirst(failures))
    }

    /// Panics on every call.
    #[must_use]
    pub fn panicking() -> Self {
        Self::with_behavior(Behavior::Panic)
    }

    /// Sleeps for `duration`, then succeeds.
    #[must_use]
    pub fn sleeping(duration: Duration) -> Self {
        Self::with_behavior(Behavior::Sleep(duration))
    }

    /// Sleeps for `duration` on first deliveries; succeeds at once on
    /// redeliveries.
    #[must_use]
    pub fn sleeping_unless_redelivered(duration: Duration) -> Self {
        Self::with_behavior(Behavior::SleepUnlessRedelivered(duration))
    }

    /// Fails every call with a payload shape error.
    #[must_use]
    pub fn rejecting_payload() -> Self {
        Self::with_behavior(Behavior::RejectPayload)
    }

    /// Messages received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Message> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of calls that were running at the same time.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, message: &Message) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push(message.clone());
        calls.len()
    }
}

struct InProgress<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InProgress<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EventHandler for RecordingHandler {
    #[allow(clippy::panic)]
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a> {
        let call = self.record(message);

        Box::pin(async move {
            let _guard = InProgress::enter(&self.in_progress, &self.peak);

            match &self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(HandlerError::failed(format!("scripted failure #{call}"))),
                Behavior::FailFirst(n) if call <= *n => {
                    Err(HandlerError::failed(format!("scripted failure #{call}")))
                },
                Behavior::FailFirst(_) => Ok(()),
                Behavior::Panic => panic!("scripted panic"),
                Behavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                },
                Behavior::SleepUnlessRedelivered(duration) => {
                    if !message.redelivered {
                        tokio::time::sleep(*duration).await;
                    }
                    Ok(())
                },
                Behavior::RejectPayload => Err(HandlerError::Decode(DecodeError::Shape(
                    "scripted shape mismatch".to_string(),
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use notifier_core::{Delivery, DeliveryTag};

    fn message() -> Message {
        let delivery = Delivery::new(DeliveryTag::new(1), "{}");
        Message::from_delivery(&delivery, "post.created", serde_json::json!({}), 1)
    }

    #[tokio::test]
    async fn failing_first_recovers() {
        let handler = RecordingHandler::failing_first(2);
        let msg = message();

        assert!(handler.handle(&msg).await.is_err());
        assert!(handler.handle(&msg).await.is_err());
        assert!(handler.handle(&msg).await.is_ok());
        assert_eq!(handler.call_count(), 3);
    }

    #[tokio::test]
    async fn clones_share_the_record() {
        let handler = RecordingHandler::succeeding();
        let clone = handler.clone();
        clone.handle(&message()).await.unwrap();

        assert_eq!(handler.call_count(), 1);
        assert_eq!(handler.calls()[0].pattern, "post.created");
        assert_eq!(handler.peak_concurrency(), 1);
    }
}
