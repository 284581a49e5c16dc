//! Delivery model.
//!
//! A [`Delivery`] is one message as received from the broker: opaque payload
//! bytes plus the metadata needed to route and settle it. Handlers never see a
//! `Delivery`; they receive a [`Message`], which carries the decoded payload and
//! no settlement capability.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Broker-assigned identifier of a delivery, scoped to one channel.
///
/// Tags are reassigned when a message is redelivered, so they identify a
/// delivery, not a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Wrap a raw tag.
    #[must_use]
    pub const fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// The raw tag value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message across redeliveries.
///
/// Uses the publisher's message id when there is one, otherwise a digest of
/// pattern and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryKey {
    /// Publisher-assigned message id
    MessageId(String),
    /// Digest of pattern and payload bytes
    Fingerprint {
        /// Event pattern, if any
        pattern: Option<String>,
        /// Payload digest
        digest: u64,
    },
}

impl fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageId(id) => write!(f, "id:{id}"),
            Self::Fingerprint { pattern, digest } => {
                write!(f, "{}:{digest:016x}", pattern.as_deref().unwrap_or("-"))
            },
        }
    }
}

/// One message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped delivery tag
    pub tag: DeliveryTag,
    /// Event pattern taken from message metadata
    pub pattern: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
    /// When the delivery arrived at this consumer
    pub received_at: DateTime<Utc>,
    /// Publisher-assigned message id
    pub message_id: Option<String>,
    /// Declared payload content type
    pub content_type: Option<String>,
    /// String-valued message headers
    pub headers: BTreeMap<String, String>,
    /// Broker-maintained delivery count (quorum queues), if supplied
    pub delivery_count: Option<u32>,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
}

impl Delivery {
    /// Create a delivery with the given tag and payload and empty metadata.
    #[must_use]
    pub fn new(tag: DeliveryTag, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            pattern: None,
            payload: payload.into(),
            redelivered: false,
            received_at: Utc::now(),
            message_id: None,
            content_type: None,
            headers: BTreeMap::new(),
            delivery_count: None,
            exchange: String::new(),
            routing_key: String::new(),
        }
    }

    /// Set the event pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Mark the delivery as redelivered.
    #[must_use]
    pub const fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Set the publisher message id.
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

    /// Set the broker-supplied delivery count.
    #[must_use]
    pub const fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = Some(count);
        self
    }

    /// Set exchange and routing key.
    #[must_use]
    pub fn with_route(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self.routing_key = routing_key.into();
        self
    }

    /// Identity of the underlying message, stable across redeliveries.
    #[must_use]
    pub fn key(&self) -> DeliveryKey {
        if let Some(id) = self.message_id.as_ref().filter(|id| !id.is_empty()) {
            return DeliveryKey::MessageId(id.clone());
        }

        let mut hasher = DefaultHasher::new();
        self.pattern.hash(&mut hasher);
        self.payload.hash(&mut hasher);

        DeliveryKey::Fingerprint {
            pattern: self.pattern.clone(),
            digest: hasher.finish(),
        }
    }
}

/// Handler-facing view of a delivery.
///
/// Carries the decoded payload and the metadata a handler may need to be
/// idempotent. Settlement stays with the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Event pattern the message was routed by
    pub pattern: String,
    /// Decoded payload
    pub payload: serde_json::Value,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
    /// 1-based processing attempt
    pub attempt: u32,
    /// Publisher-assigned message id
    pub message_id: Option<String>,
    /// String-valued message headers
    pub headers: BTreeMap<String, String>,
    /// When the delivery arrived at this consumer
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Build the handler view of a delivery.
    #[must_use]
    pub fn from_delivery(
        delivery: &Delivery,
        pattern: impl Into<String>,
        payload: serde_json::Value,
        attempt: u32,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            payload,
            redelivered: delivery.redelivered,
            attempt,
            message_id: delivery.message_id.clone(),
            headers: delivery.headers.clone(),
            received_at: delivery.received_at,
        }
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Shape`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| DecodeError::Shape(e.to_string()))
    }
}
