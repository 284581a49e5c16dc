//! Exchange and queue declarations.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Broker routing mode of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Broadcast to every bound queue, routing key ignored
    Fanout,
    /// Route by exact routing key match
    Direct,
    /// Route by routing key pattern (`*` one word, `#` zero or more)
    Topic,
}

impl ExchangeKind {
    /// Wire name of the exchange type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fanout => "fanout",
            Self::Direct => "direct",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fanout" => Ok(Self::Fanout),
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            other => Err(ConfigError::Invalid {
                key: "exchange type".to_string(),
                reason: format!("unknown exchange type '{other}' (expected fanout, direct or topic)"),
            }),
        }
    }
}

/// Exchange the consumer's queue is bound to.
///
/// An empty name denotes the broker's default exchange: messages published
/// straight to the queue, with no declaration or binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name
    pub name: String,
    /// Routing mode
    pub kind: ExchangeKind,
    /// Survives broker restarts
    pub durable: bool,
}

impl ExchangeSpec {
    /// Durable exchange of the given kind.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    /// Durable fanout exchange.
    #[must_use]
    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Fanout)
    }

    /// Durable direct exchange.
    #[must_use]
    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Direct)
    }

    /// Durable topic exchange.
    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeKind::Topic)
    }

    /// The broker's default exchange (direct-to-queue).
    #[must_use]
    pub fn default_exchange() -> Self {
        Self::new(String::new(), ExchangeKind::Direct)
    }

    /// Set durability.
    #[must_use]
    pub const fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Whether this is the broker's default exchange.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

/// Queue the consumer reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name
    pub name: String,
    /// Survives broker restarts
    pub durable: bool,
    /// Deleted by the broker once its last consumer goes away
    pub auto_delete: bool,
    /// Routing keys for direct/topic bindings; ignored for fanout
    pub binding_keys: Vec<String>,
    /// Exchange that receives messages rejected without requeue
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    /// Durable, non-auto-delete queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            binding_keys: Vec::new(),
            dead_letter_exchange: None,
        }
    }

    /// Set durability.
    #[must_use]
    pub const fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Set auto-delete.
    #[must_use]
    pub const fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    /// Add a routing key for direct/topic bindings.
    #[must_use]
    pub fn with_binding_key(mut self, key: impl Into<String>) -> Self {
        self.binding_keys.push(key.into());
        self
    }

    /// Route rejected messages to the given exchange.
    #[must_use]
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    /// Check the dead letter exchange against the exchange the queue is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DeadLetterExchange`] if it is blank or is the
    /// source exchange itself.
    pub fn validate_dead_letter_exchange(&self, source_exchange: &str) -> Result<(), ConfigError> {
        let Some(dlx) = &self.dead_letter_exchange else {
            return Ok(());
        };
        let reason = if dlx.trim().is_empty() {
            "must not be empty"
        } else if dlx == source_exchange {
            "must differ from the exchange the queue consumes from"
        } else {
            return Ok(());
        };
        Err(ConfigError::DeadLetterExchange {
            exchange: dlx.clone(),
            reason: reason.to_string(),
        })
    }

    /// Name of the queue bound to the dead-letter exchange.
    #[must_use]
    pub fn dead_letter_queue_name(&self) -> String {
        format!("{}.dead-letter", self.name)
    }

    /// Routing keys to bind with on a direct/topic exchange.
    ///
    /// Falls back to the queue name when none are configured.
    #[must_use]
    pub fn effective_binding_keys(&self) -> Vec<String> {
        if self.binding_keys.is_empty() {
            vec![self.name.clone()]
        } else {
            self.binding_keys.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_kind_parses_case_insensitively() {
        assert_eq!("Fanout".parse::<ExchangeKind>(), Ok(ExchangeKind::Fanout));
        assert_eq!(" topic ".parse::<ExchangeKind>(), Ok(ExchangeKind::Topic));
        assert!("headers".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn binding_keys_default_to_queue_name() {
        let queue = QueueSpec::new("post_queue");
        assert_eq!(queue.effective_binding_keys(), vec!["post_queue".to_string()]);

        let queue = queue.with_binding_key("post.*");
        assert_eq!(queue.effective_binding_keys(), vec!["post.*".to_string()]);
    }

    #[test]
    fn dead_letter_queue_is_derived_from_queue_name() {
        let queue = QueueSpec::new("notification_fanout_queue").with_dead_letter_exchange("notifications.dlx");
        assert_eq!(queue.dead_letter_queue_name(), "notification_fanout_queue.dead-letter");
    }

    #[test]
    fn dead_letter_exchange_must_be_named_and_distinct() {
        let queue = QueueSpec::new("notification_fanout_queue");
        assert_eq!(queue.validate_dead_letter_exchange("post_fanout_exchange"), Ok(()));

        let parked = queue.clone().with_dead_letter_exchange("notification_dlx");
        assert_eq!(parked.validate_dead_letter_exchange("post_fanout_exchange"), Ok(()));

        let looped = queue.clone().with_dead_letter_exchange("post_fanout_exchange");
        assert!(matches!(
            looped.validate_dead_letter_exchange("post_fanout_exchange"),
            Err(ConfigError::DeadLetterExchange { exchange, .. }) if exchange == "post_fanout_exchange"
        ));

        let blank = queue.with_dead_letter_exchange(" ");
        assert!(matches!(
            blank.validate_dead_letter_exchange("post_fanout_exchange"),
            Err(ConfigError::DeadLetterExchange { .. })
        ));
    }
}
