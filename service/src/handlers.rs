//! Event handlers for the notification service.

use notifier_core::{EventHandler, HandlerFuture, HandlerRegistry, Message};

/// Pattern published by the post service when a post is created.
pub const POST_CREATED: &str = "post.created";

/// Logs each created post as a received notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostCreatedHandler;

impl EventHandler for PostCreatedHandler {
    fn handle<'a>(&'a self, message: &'a Message) -> HandlerFuture<'a> {
        Box::pin(async move {
            tracing::info!(
                message_id = ?message.message_id,
                attempt = message.attempt,
                redelivered = message.redelivered,
                data = %message.payload,
                "Notification received"
            );
            Ok(())
        })
    }
}

/// Handlers the service subscribes with.
#[must_use]
pub fn registry() -> HandlerRegistry {
    HandlerRegistry::new().with_handler(POST_CREATED, PostCreatedHandler)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use notifier_core::{Delivery, DeliveryTag};

    #[test]
    fn registry_routes_post_created() {
        let registry = registry();
        assert_eq!(registry.patterns(), vec![POST_CREATED]);
        assert!(registry.resolve("post.deleted").is_none());
    }

    #[tokio::test]
    async fn post_created_is_acknowledged() {
        let delivery = Delivery::new(DeliveryTag::new(1), br#"{"id":1,"title":"hello"}"#.to_vec())
            .with_pattern(POST_CREATED);
        let message = Message::from_delivery(
            &delivery,
            POST_CREATED,
            serde_json::json!({"id": 1, "title": "hello"}),
            1,
        );

        let handler = registry().resolve(POST_CREATED).unwrap();
        assert!(handler.handle(&message).await.is_ok());
    }
}
