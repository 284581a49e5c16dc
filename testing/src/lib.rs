//! # Notifier Testing
//!
//! Testing utilities for the notifier consumption engine.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: an AMQP-like broker with fault injection and inspection
//! - [`TestMessage`]: messages to publish into it
//! - [`RecordingHandler`]: scripted handlers that record their calls
//! - [`strategies`]: proptest strategies for delivery scenarios
//!
//! ## Example
//!
//! ```ignore
//! use notifier_testing::{InMemoryBroker, RecordingHandler, TestMessage};
//!
//! #[tokio::test]
//! async fn test_post_created() {
//!     let broker = InMemoryBroker::new();
//!     let handler = RecordingHandler::succeeding();
//!     // ... build a consumer against `broker` and register `handler` ...
//!     broker.publish("post_fanout_exchange", "", TestMessage::new("post.created", r#"{"id":1}"#));
//! }
//! ```

/// In-memory broker
pub mod broker;

/// Recording handlers
pub mod handlers;

/// Test messages
pub mod message;

/// Property-based testing strategies.
pub mod strategies {
    use proptest::prelude::*;

    /// Event patterns, mostly routable.
    pub fn patterns() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            6 => Just(Some("post.created".to_string())),
            2 => Just(Some("post.deleted".to_string())),
            1 => Just(None),
        ]
    }

    /// Messages as `(pattern, failures before success)`.
    pub fn messages(max_len: usize) -> impl Strategy<Value = Vec<(Option<String>, u32)>> {
        prop::collection::vec((patterns(), 0_u32..5), 1..=max_len)
    }
}

pub use broker::{InMemoryBroker, InMemoryChannel, SettlementRecord};
pub use handlers::RecordingHandler;
pub use message::TestMessage;

/// Install a test tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
