//! Per-delivery state machine.
//!
//! ```text
//! Received ──► Decoding ──► Dispatched ──► Acked
//!    │            │             ├────────► NackRequeued ──► (redelivered as a new delivery)
//!    │            │             └────────► Rejected
//!    └────────────┴──────────────────────► Rejected   (unroutable / poison)
//! ```
//!
//! `Acked` and `Rejected` are terminal. `NackRequeued` ends this delivery; the
//! broker hands the message back later under a fresh tag.

use crate::delivery::DeliveryTag;
use std::fmt;
use thiserror::Error;

/// Where a delivery is in its processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Pulled off the consumption stream
    Received,
    /// Pattern resolved, payload being decoded
    Decoding,
    /// Handed to the handler
    Dispatched,
    /// Acknowledged
    Acked,
    /// Negatively acknowledged with requeue
    NackRequeued,
    /// Rejected without requeue (dead-lettered when configured)
    Rejected,
}

impl DeliveryState {
    /// Whether the message is gone from the broker's point of view.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Acked | Self::Rejected)
    }

    /// Whether the delivery has been settled with the broker.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Acked | Self::Rejected | Self::NackRequeued)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Decoding | Self::Rejected)
                | (Self::Decoding, Self::Dispatched | Self::Rejected)
                | (Self::Dispatched, Self::Acked | Self::NackRequeued | Self::Rejected)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Decoding => "decoding",
            Self::Dispatched => "dispatched",
            Self::Acked => "acked",
            Self::NackRequeued => "nack_requeued",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// An illegal state transition was attempted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Delivery {tag}: illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Delivery tag
    pub tag: DeliveryTag,
    /// Current state
    pub from: DeliveryState,
    /// Requested state
    pub to: DeliveryState,
}

/// Tracks one delivery through the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryLifecycle {
    tag: DeliveryTag,
    state: DeliveryState,
}

impl DeliveryLifecycle {
    /// Start tracking a freshly received delivery.
    #[must_use]
    pub const fn received(tag: DeliveryTag) -> Self {
        Self {
            tag,
            state: DeliveryState::Received,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> DeliveryState {
        self.state
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged if `next`
    /// is not a legal successor.
    pub fn advance(&mut self, next: DeliveryState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                tag: self.tag,
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(tag = %self.tag, from = %self.state, to = %next, "Delivery state transition");
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_acked() {
        let mut lifecycle = DeliveryLifecycle::received(DeliveryTag::new(1));
        assert!(lifecycle.advance(DeliveryState::Decoding).is_ok());
        assert!(lifecycle.advance(DeliveryState::Dispatched).is_ok());
        assert!(lifecycle.advance(DeliveryState::Acked).is_ok());
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn terminal_states_cannot_be_left() {
        let mut lifecycle = DeliveryLifecycle::received(DeliveryTag::new(3));
        assert!(lifecycle.advance(DeliveryState::Rejected).is_ok());

        let err = lifecycle.advance(DeliveryState::Acked);
        assert_eq!(
            err,
            Err(InvalidTransition {
                tag: DeliveryTag::new(3),
                from: DeliveryState::Rejected,
                to: DeliveryState::Acked,
            })
        );
        assert_eq!(lifecycle.state(), DeliveryState::Rejected);
    }

    #[test]
    fn ack_requires_dispatch() {
        assert!(!DeliveryState::Received.can_transition_to(DeliveryState::Acked));
        assert!(!DeliveryState::Decoding.can_transition_to(DeliveryState::NackRequeued));
        assert!(DeliveryState::NackRequeued.is_settled());
        assert!(!DeliveryState::NackRequeued.is_terminal());
    }
}
