//! Messages published into the in-memory broker.

use std::collections::BTreeMap;

/// A message as a publisher would send it.
///
/// # Example
///
/// ```
/// use notifier_testing::TestMessage;
///
/// let message = TestMessage::json("post.created", &serde_json::json!({ "id": 42, "title": "X" }))
///     .with_message_id("post-42");
/// assert_eq!(message.pattern.as_deref(), Some("post.created"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    /// Event pattern (AMQP `type` property)
    pub pattern: Option<String>,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Publisher message id
    pub message_id: Option<String>,
    /// Content type
    pub content_type: Option<String>,
    /// Headers
    pub headers: BTreeMap<String, String>,
}

impl TestMessage {
    /// Message with a pattern and raw payload.
    #[must_use]
    pub fn new(pattern: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::without_pattern(payload)
        }
    }

    /// JSON message with a pattern.
    #[must_use]
    pub fn json(pattern: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self::new(pattern, payload.to_string()).with_content_type("application/json")
    }

    /// Message carrying no pattern metadata.
    #[must_use]
    pub fn without_pattern(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            pattern: None,
            payload: payload.into(),
            message_id: None,
            content_type: None,
            headers: BTreeMap::new(),
        }
    }

    /// Set the message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
