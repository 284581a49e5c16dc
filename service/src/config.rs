//! Configuration management for the notification service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Values that are present but malformed are errors, not silently defaulted.

use notifier_core::{ConfigError, ExchangeKind, ExchangeSpec, QueueSpec};
use notifier_runtime::{BackoffPolicy, DispatchPolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection configuration
    pub amqp: AmqpConfig,
    /// Exchange and queue configuration
    pub subscription: SubscriptionConfig,
    /// Dispatch configuration
    pub dispatch: DispatchConfig,
    /// Install the Prometheus metrics recorder
    pub metrics_enabled: bool,
}

/// Broker connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmqpConfig {
    /// Broker URLs, tried in order (`AMQP_URLS`, comma-separated)
    pub urls: Vec<String>,
    /// Broker auto-ack; must stay `false` (`AMQP_NO_ACK`)
    pub no_ack: bool,
    /// First reconnect delay in milliseconds (default: 500)
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap in milliseconds (default: 30000)
    pub reconnect_max_ms: u64,
    /// Per-URL connection attempt timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,
    /// Give up at startup after this many failed attempts (default: retry forever)
    pub startup_retry_budget: Option<usize>,
}

/// Exchange and queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Exchange name; empty consumes the queue directly
    pub exchange: String,
    /// Exchange type: fanout, direct, topic
    pub exchange_type: String,
    /// Exchange durability
    pub exchange_durable: bool,
    /// Queue name
    pub queue: String,
    /// Queue durability
    pub queue_durable: bool,
    /// Queue auto-delete
    pub queue_auto_delete: bool,
    /// Routing keys for direct/topic exchanges
    pub binding_keys: Vec<String>,
    /// Dead-letter exchange for rejected messages
    pub dead_letter_exchange: Option<String>,
}

/// Dispatch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deliveries processed at once; also the prefetch count (default: 1)
    pub concurrency: usize,
    /// Attempts before a failing message is dead-lettered (default: 3)
    pub max_attempts: u32,
    /// Per-invocation handler timeout in milliseconds
    pub handler_timeout_ms: Option<u64>,
    /// Time in-flight handlers get at shutdown, in seconds (default: 10)
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first
    /// if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `.env` exists but cannot be read
    /// or parsed, or a variable is set to a value that cannot be parsed, and
    /// [`ConfigError::AutoAckEnabled`] if `AMQP_NO_ACK` is true.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv_loaded(dotenvy::dotenv())?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let config = Self {
            amqp: AmqpConfig {
                urls: vars
                    .list("AMQP_URLS")
                    .unwrap_or_else(|| vec!["amqp://localhost:5672".to_string()]),
                no_ack: vars.parse_bool("AMQP_NO_ACK")?.unwrap_or(false),
                reconnect_initial_ms: vars.parse("NOTIFIER_RECONNECT_INITIAL_MS")?.unwrap_or(500),
                reconnect_max_ms: vars.parse("NOTIFIER_RECONNECT_MAX_MS")?.unwrap_or(30_000),
                connect_timeout_ms: vars.parse("NOTIFIER_CONNECT_TIMEOUT_MS")?.unwrap_or(10_000),
                startup_retry_budget: vars.parse("NOTIFIER_STARTUP_RETRY_BUDGET")?,
            },
            subscription: SubscriptionConfig {
                exchange: vars
                    .raw("NOTIFIER_EXCHANGE")
                    .map_or_else(|| "post_fanout_exchange".to_string(), |s| s.trim().to_string()),
                exchange_type: vars
                    .string("NOTIFIER_EXCHANGE_TYPE")
                    .unwrap_or_else(|| "fanout".to_string()),
                exchange_durable: vars.parse_bool("NOTIFIER_EXCHANGE_DURABLE")?.unwrap_or(true),
                queue: vars
                    .string("NOTIFIER_QUEUE")
                    .unwrap_or_else(|| "notification_fanout_queue".to_string()),
                queue_durable: vars.parse_bool("NOTIFIER_QUEUE_DURABLE")?.unwrap_or(true),
                queue_auto_delete: vars.parse_bool("NOTIFIER_QUEUE_AUTO_DELETE")?.unwrap_or(false),
                binding_keys: vars.list("NOTIFIER_BINDING_KEYS").unwrap_or_default(),
                dead_letter_exchange: vars.raw("NOTIFIER_DEAD_LETTER_EXCHANGE").map(|s| s.trim().to_string()),
            },
            dispatch: DispatchConfig {
                concurrency: vars.parse("NOTIFIER_PREFETCH")?.unwrap_or(1),
                max_attempts: vars.parse("NOTIFIER_MAX_ATTEMPTS")?.unwrap_or(3),
                handler_timeout_ms: vars.parse("NOTIFIER_HANDLER_TIMEOUT_MS")?,
                shutdown_grace_secs: vars.parse("NOTIFIER_SHUTDOWN_GRACE_SECS")?.unwrap_or(10),
            },
            metrics_enabled: vars.parse_bool("METRICS_ENABLED")?.unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amqp.no_ack {
            return Err(ConfigError::AutoAckEnabled);
        }
        if self.amqp.urls.is_empty() {
            return Err(invalid("AMQP_URLS", "at least one broker URL is required"));
        }
        if self.subscription.queue.is_empty() {
            return Err(invalid("NOTIFIER_QUEUE", "queue name must not be empty"));
        }
        if self.amqp.reconnect_initial_ms > self.amqp.reconnect_max_ms {
            return Err(invalid(
                "NOTIFIER_RECONNECT_INITIAL_MS",
                "must not exceed NOTIFIER_RECONNECT_MAX_MS",
            ));
        }
        if self.amqp.connect_timeout_ms == 0 {
            return Err(invalid("NOTIFIER_CONNECT_TIMEOUT_MS", "must be greater than zero"));
        }
        if u16::try_from(self.dispatch.concurrency).is_err() {
            return Err(invalid("NOTIFIER_PREFETCH", "must fit a 16-bit prefetch count"));
        }
        self.exchange_kind()?;
        self.queue_spec().validate_dead_letter_exchange(&self.subscription.exchange)?;
        self.dispatch_policy().validate()
    }

    /// Parsed exchange type.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown exchange type.
    pub fn exchange_kind(&self) -> Result<ExchangeKind, ConfigError> {
        ExchangeKind::from_str(&self.subscription.exchange_type).map_err(|_| {
            invalid(
                "NOTIFIER_EXCHANGE_TYPE",
                &format!("unknown exchange type '{}'", self.subscription.exchange_type),
            )
        })
    }

    /// Exchange declaration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown exchange type.
    pub fn exchange_spec(&self) -> Result<ExchangeSpec, ConfigError> {
        if self.subscription.exchange.is_empty() {
            return Ok(ExchangeSpec::default_exchange());
        }
        Ok(ExchangeSpec::new(self.subscription.exchange.clone(), self.exchange_kind()?)
            .with_durable(self.subscription.exchange_durable))
    }

    /// Queue declaration.
    #[must_use]
    pub fn queue_spec(&self) -> QueueSpec {
        let sub = &self.subscription;
        let mut queue = QueueSpec::new(sub.queue.clone())
            .with_durable(sub.queue_durable)
            .with_auto_delete(sub.queue_auto_delete);
        for key in &sub.binding_keys {
            queue = queue.with_binding_key(key.clone());
        }
        if let Some(dlx) = &sub.dead_letter_exchange {
            queue = queue.with_dead_letter_exchange(dlx.clone());
        }
        queue
    }

    /// Retry and concurrency settings.
    #[must_use]
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        let policy = DispatchPolicy::default()
            .with_concurrency(self.dispatch.concurrency)
            .with_max_attempts(self.dispatch.max_attempts);
        match self.dispatch.handler_timeout_ms {
            Some(ms) => policy.with_handler_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }

    /// Reconnect backoff.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::builder()
            .initial_delay(Duration::from_millis(self.amqp.reconnect_initial_ms))
            .max_delay(Duration::from_millis(self.amqp.reconnect_max_ms))
            .build()
    }

    /// Timeout for a single connection attempt.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.amqp.connect_timeout_ms)
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.dispatch.shutdown_grace_secs)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        self.raw(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    /// Comma-separated, trimmed, non-empty items.
    fn list(&self, key: &str) -> Option<Vec<String>> {
        let items: Vec<String> = self
            .string(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|s| s.parse().map_err(|e: T::Err| invalid(key, &format!("'{s}': {e}"))))
            .transpose()
    }

    fn parse_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.string(key)
            .map(|s| match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &format!("'{s}' is not a boolean"))),
            })
            .transpose()
    }
}

/// A missing `.env` is not an error.
fn dotenv_loaded<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(invalid(".env", &e.to_string())),
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
