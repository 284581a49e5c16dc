//! # Notifier Core
//!
//! Core traits and types for a reliable at-least-once message consumer.
//!
//! This crate holds everything that is independent of a concrete broker client
//! and of the runtime that drives consumption:
//!
//! - **Delivery model**: [`Delivery`], [`DeliveryTag`] and the handler-facing [`Message`]
//! - **Connection state**: [`ConnectionState`]
//! - **Broker seam**: the [`Broker`] and [`BrokerChannel`] traits implemented by
//!   `notifier-amqp` (production) and `notifier-testing` (in-memory)
//! - **Topology**: [`ExchangeSpec`] and [`QueueSpec`]
//! - **Decoding**: the [`PayloadDecoder`] trait and the default [`JsonDecoder`]
//! - **Routing**: the [`EventHandler`] trait and the [`HandlerRegistry`]
//! - **Lifecycle**: the per-delivery state machine ([`DeliveryState`])
//! - **Errors**: one `thiserror` enum per error kind
//!
//! ## Example
//!
//! ```
//! use notifier_core::{HandlerRegistry, HandlerError, handler_fn};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(
//!     "post.created",
//!     handler_fn(|message| async move {
//!         tracing::info!(payload = %message.payload, "Notification received");
//!         Ok::<_, HandlerError>(())
//!     }),
//! );
//!
//! assert!(registry.resolve("post.created").is_some());
//! assert!(registry.resolve("post.deleted").is_none());
//! ```

pub mod broker;
pub mod connection;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod topology;

pub use broker::{Broker, BrokerChannel, BrokerFuture, DeliveryStream, Settlement};
pub use connection::ConnectionState;
pub use decoder::{Envelope, JsonDecoder, PayloadDecoder};
pub use delivery::{Delivery, DeliveryKey, DeliveryTag, Message};
pub use error::{BindError, ConfigError, ConnectionError, DecodeError, HandlerError, UnroutableError};
pub use handler::{EventHandler, FnHandler, HandlerFuture, TypedHandler, handler_fn, typed_handler};
pub use lifecycle::{DeliveryLifecycle, DeliveryState, InvalidTransition};
pub use registry::HandlerRegistry;
pub use topology::{ExchangeKind, ExchangeSpec, QueueSpec};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
