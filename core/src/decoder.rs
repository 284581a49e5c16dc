//! Payload decoding.
//!
//! Payloads stay opaque bytes until a [`PayloadDecoder`] turns them into a
//! JSON value. Failure is a [`DecodeError`], never a panic.
//!
//! Publishers that put the routing pattern in the body rather than in message
//! properties send an [`Envelope`]: `{"pattern": "post.created", "data": {..}}`.

use crate::error::DecodeError;
use serde_json::Value;

/// Turns raw payload bytes into a structured value.
pub trait PayloadDecoder: Send + Sync {
    /// Decode a payload.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the bytes cannot be decoded.
    fn decode(&self, content_type: Option<&str>, payload: &[u8]) -> Result<serde_json::Value, DecodeError>;
}

/// JSON decoder, the default.
///
/// Accepts a missing content type, `application/json`, `text/json` and any
/// `+json` structured suffix. Parameters such as `charset` are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    fn accepts(content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return true;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        essence.is_empty()
            || essence == "application/json"
            || essence == "text/json"
            || essence.ends_with("+json")
    }
}

impl PayloadDecoder for JsonDecoder {
    fn decode(&self, content_type: Option<&str>, payload: &[u8]) -> Result<serde_json::Value, DecodeError> {
        if !Self::accepts(content_type) {
            return Err(DecodeError::UnsupportedContentType(
                content_type.unwrap_or_default().to_string(),
            ));
        }
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }
        serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))
    }
}

/// Body that carries its own routing pattern next to the event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Event pattern
    pub pattern: String,
    /// Event data handed to the handler
    pub data: Value,
}

impl Envelope {
    /// Split a decoded body into pattern and data.
    ///
    /// Returns `None` unless the body is an object with a non-empty string
    /// `pattern` and a `data` field.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let pattern = match fields.remove("pattern") {
            Some(Value::String(pattern)) if !pattern.trim().is_empty() => pattern,
            _ => return None,
        };
        let data = fields.remove("data")?;
        Some(Self { pattern, data })
    }
}
