//! Handler registry: event pattern → handler.
//!
//! Populated at startup by ordinary registration calls, then shared read-only
//! (behind an `Arc`) with the dispatcher. There is no API to mutate a registry
//! through a shared reference, so no locking is needed at dispatch time.

use crate::handler::EventHandler;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Mapping from event pattern to handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pattern.
    ///
    /// Registering a pattern twice replaces the earlier handler and logs a
    /// warning.
    pub fn register<H>(&mut self, pattern: impl Into<String>, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        let pattern = pattern.into();
        if self.handlers.insert(pattern.clone(), Arc::new(handler)).is_some() {
            tracing::warn!(pattern = %pattern, "Handler registration replaced an existing handler");
        } else {
            tracing::debug!(pattern = %pattern, "Handler registered");
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_handler<H>(mut self, pattern: impl Into<String>, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.register(pattern, handler);
        self
    }

    /// Look up the handler for a pattern.
    #[must_use]
    pub fn resolve(&self, pattern: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(pattern).cloned()
    }

    /// Registered patterns, sorted.
    #[must_use]
    pub fn patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        patterns.sort_unstable();
        patterns
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Delivery, DeliveryTag, Message};
    use crate::error::HandlerError;
    use crate::handler::handler_fn;

    fn message() -> Message {
        Message::from_delivery(
            &Delivery::new(DeliveryTag::new(1), Vec::new()),
            "post.created",
            serde_json::Value::Null,
            1,
        )
    }

    #[test]
    fn resolves_registered_patterns_only() {
        let registry = HandlerRegistry::new()
            .with_handler("post.created", handler_fn(|_| async { Ok(()) }))
            .with_handler("post.updated", handler_fn(|_| async { Ok(()) }));

        assert!(registry.resolve("post.created").is_some());
        assert!(registry.resolve("post.deleted").is_none());
        assert_eq!(registry.patterns(), vec!["post.created", "post.updated"]);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("post.created", handler_fn(|_| async { Err(HandlerError::failed("first")) }))
            .register("post.created", handler_fn(|_| async { Ok(()) }));

        assert_eq!(registry.len(), 1);
        let handler = registry.resolve("post.created");
        assert!(handler.is_some());
        if let Some(handler) = handler {
            assert_eq!(handler.handle(&message()).await, Ok(()));
        }
    }
}
