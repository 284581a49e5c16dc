//! Event handlers.
//!
//! A handler is the business logic plugged into the consumer for one event
//! pattern. It receives a [`Message`] and reports success or failure; the
//! dispatcher decides what that means for the broker.
//!
//! Handlers may be retried, so they should be idempotent. The message carries
//! `redelivered`, `attempt` and `message_id` to help detect duplicates.
//!
//! # Example
//!
//! ```
//! use notifier_core::{HandlerError, Message, typed_handler};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct PostCreated {
//!     id: u64,
//!     title: String,
//! }
//!
//! let handler = typed_handler(|post: PostCreated, _message: Message| async move {
//!     if post.title.is_empty() {
//!         return Err(HandlerError::failed("post without title"));
//!     }
//!     Ok(())
//! });
//! # let _ = handler;
//! ```

use crate::delivery::Message;
use crate::error::HandlerError;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Boxed future returned by handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Business logic for one event pattern.
pub trait EventHandler: Send + Sync {
    /// Process one message.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`]. [`HandlerError::Decode`] marks the payload
    /// as poison; every other variant is retried up to the configured bound.
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a>;
}

/// Handler backed by an async closure over the raw [`Message`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a> {
        Box::pin((self.f)(message.clone()))
    }
}

/// Wrap an async closure as a handler.
#[must_use]
pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

/// Handler that deserializes the payload into `T` before calling the closure.
///
/// A payload that does not match `T` fails with [`HandlerError::Decode`] and is
/// treated as poison.
pub struct TypedHandler<T, F> {
    f: F,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F, Fut> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a> {
        match message.payload_as::<T>() {
            Ok(payload) => Box::pin((self.f)(payload, message.clone())),
            Err(e) => Box::pin(async move { Err(HandlerError::Decode(e)) }),
        }
    }
}

/// Wrap an async closure over a typed payload as a handler.
#[must_use]
pub const fn typed_handler<T, F, Fut>(f: F) -> TypedHandler<T, F>
where
    T: DeserializeOwned,
    F: Fn(T, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    TypedHandler {
        f,
        _payload: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Delivery, DeliveryTag};
    use crate::error::DecodeError;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Deserialize)]
    struct PostCreated {
        id: u64,
    }

    fn message(payload: serde_json::Value) -> Message {
        Message::from_delivery(&Delivery::new(DeliveryTag::new(1), Vec::new()), "post.created", payload, 1)
    }

    #[tokio::test]
    async fn fn_handler_sees_the_message() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let handler = handler_fn(move |message: Message| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.store(message.payload["id"].as_u64().unwrap_or_default(), Ordering::SeqCst);
                Ok(())
            }
        });

        let result = handler.handle(&message(serde_json::json!({ "id": 42 }))).await;
        assert_eq!(result, Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn typed_handler_deserializes_payload() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let handler = typed_handler(move |post: PostCreated, _message: Message| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.store(post.id, Ordering::SeqCst);
                Ok(())
            }
        });

        assert_eq!(handler.handle(&message(serde_json::json!({ "id": 7 }))).await, Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn typed_handler_rejects_wrong_shape_as_decode_error() {
        let handler = typed_handler(|_post: PostCreated, _message: Message| async { Ok(()) });

        let result = handler.handle(&message(serde_json::json!({ "title": "no id" }))).await;
        assert!(matches!(result, Err(HandlerError::Decode(DecodeError::Shape(_)))));
    }
}
