//! Connection Manager.
//!
//! Owns the lifecycle of the single logical broker connection: connect with
//! URL failover, publish state transitions, reconnect with exponential
//! backoff, notify listeners when an established connection is lost.
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::builder(broker)
//!     .url("amqp://rabbit-a:5672")
//!     .url("amqp://rabbit-b:5672")
//!     .backoff(BackoffPolicy::default())
//!     .build()?;
//!
//! manager.on_disconnect(|err| tracing::warn!(error = %err, "Lost broker"));
//! let channel = manager.connect_with_backoff(&mut drain_signal).await?;
//! ```

use crate::backoff::BackoffPolicy;
use crate::metrics::ConnectionMetrics;
use crate::shutdown::DrainSignal;
use notifier_core::{Broker, BrokerChannel, ConfigError, ConnectionError, ConnectionState};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Time allowed for a single connection attempt to one URL.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked when an established connection is lost.
pub type DisconnectCallback = Box<dyn Fn(&ConnectionError) + Send + Sync>;

/// Maintains one logical connection and channel to the broker.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    urls: Vec<String>,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    startup_retry_budget: Option<usize>,
    state: watch::Sender<ConnectionState>,
    callbacks: Mutex<Vec<DisconnectCallback>>,
    ever_connected: AtomicBool,
    connections: AtomicU64,
}

impl ConnectionManager {
    /// Create a builder for a manager over `broker`.
    #[must_use]
    pub fn builder(broker: Arc<dyn Broker>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            broker,
            urls: Vec::new(),
            no_ack: false,
            backoff: BackoffPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            startup_retry_budget: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register a callback for lost connections.
    ///
    /// Callbacks run synchronously on the consumer task and should not block.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Configured broker URLs, in failover order.
    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Number of connections established so far.
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Make one pass over the configured URLs; the first success wins.
    ///
    /// Each URL gets at most the connect timeout before the next one is tried.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoUrls`] if no URL is configured, otherwise
    /// the error from the last URL tried.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        self.transition(ConnectionState::Connecting);
        let result = self.try_urls().await;
        if result.is_err() {
            self.transition(ConnectionState::Disconnected);
        }
        result
    }

    /// Connect, retrying with exponential backoff until it succeeds.
    ///
    /// Retries are unbounded unless a startup retry budget is configured and
    /// no connection has ever succeeded.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::ShutdownRequested`] if drain is signalled while
    ///   connecting or waiting to retry
    /// - [`ConnectionError::RetryBudgetExhausted`] if the startup budget runs out
    /// - [`ConnectionError::NoUrls`] if no URL is configured
    pub async fn connect_with_backoff(
        &self,
        shutdown: &mut DrainSignal,
    ) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        let mut attempt: u32 = 0;
        let mut failures: usize = 0;

        loop {
            if shutdown.is_draining() {
                self.transition(ConnectionState::Disconnected);
                return Err(ConnectionError::ShutdownRequested);
            }

            self.transition(ConnectionState::Connecting);
            let result = tokio::select! {
                result = self.try_urls() => result,
                () = shutdown.wait() => {
                    tracing::info!("Drain requested during a connection attempt");
                    self.transition(ConnectionState::Disconnected);
                    return Err(ConnectionError::ShutdownRequested);
                },
            };
            let error = match result {
                Ok(channel) => return Ok(channel),
                Err(ConnectionError::NoUrls) => {
                    self.transition(ConnectionState::Disconnected);
                    return Err(ConnectionError::NoUrls);
                },
                Err(e) => e,
            };

            failures += 1;
            if let Some(budget) = self.startup_retry_budget {
                if !self.ever_connected.load(Ordering::SeqCst) && failures >= budget {
                    tracing::error!(attempts = failures, error = %error, "Startup retry budget exhausted");
                    self.transition(ConnectionState::Disconnected);
                    return Err(ConnectionError::RetryBudgetExhausted { attempts: failures });
                }
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            ConnectionMetrics::record_reconnect_attempt();
            tracing::warn!(
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Broker unreachable, retrying"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {},
                () = shutdown.wait() => {
                    self.transition(ConnectionState::Disconnected);
                    return Err(ConnectionError::ShutdownRequested);
                },
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Record that the established connection was lost and notify listeners.
    pub fn mark_lost(&self, error: &ConnectionError) {
        tracing::warn!(error = %error, "Broker connection lost");
        self.transition(ConnectionState::Disconnected);

        let callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(error);
        }
    }

    /// Enter the draining state.
    pub fn begin_drain(&self) {
        self.transition(ConnectionState::Draining);
    }

    /// Record that the connection was closed on purpose.
    pub fn mark_closed(&self) {
        self.transition(ConnectionState::Disconnected);
    }

    async fn try_urls(&self) -> Result<Arc<dyn BrokerChannel>, ConnectionError> {
        if self.urls.is_empty() {
            return Err(ConnectionError::NoUrls);
        }

        let mut last_error = ConnectionError::NoUrls;
        for url in &self.urls {
            let attempt = tokio::time::timeout(self.connect_timeout, self.broker.connect(url)).await;
            let result = attempt.unwrap_or_else(|_| {
                Err(ConnectionError::ConnectTimeout {
                    url: redact(url),
                    timeout: self.connect_timeout,
                })
            });
            match result {
                Ok(channel) => {
                    self.ever_connected.store(true, Ordering::SeqCst);
                    let count = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::info!(url = %redact(url), connections = count, "Connected to broker");
                    self.transition(ConnectionState::Connected);
                    return Ok(channel);
                },
                Err(e) => {
                    tracing::warn!(url = %redact(url), error = %e, "Broker connection attempt failed");
                    last_error = e;
                },
            }
        }
        Err(last_error)
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Connection state changed");
            ConnectionMetrics::record_state(next);
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("urls", &self.urls.iter().map(|u| redact(u)).collect::<Vec<_>>())
            .field("state", &self.state())
            .field("backoff", &self.backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("startup_retry_budget", &self.startup_retry_budget)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    broker: Arc<dyn Broker>,
    urls: Vec<String>,
    no_ack: bool,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    startup_retry_budget: Option<usize>,
}

impl ConnectionManagerBuilder {
    /// Add a broker URL. URLs are tried in the order added.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Add several broker URLs.
    #[must_use]
    pub fn urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    /// Request broker auto-ack. Only `false` is accepted by [`build`](Self::build).
    #[must_use]
    pub const fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }

    /// Set the reconnect backoff.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Time allowed for one connection attempt to one URL (default 10s).
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fail after this many attempts if no connection has ever succeeded.
    #[must_use]
    pub const fn startup_retry_budget(mut self, attempts: usize) -> Self {
        self.startup_retry_budget = Some(attempts);
        self
    }

    /// Build the manager.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::AutoAckEnabled`] if `no_ack` was set
    /// - [`ConfigError::Invalid`] if a URL is blank, the connect timeout or
    ///   the retry budget is zero
    pub fn build(self) -> Result<ConnectionManager, ConfigError> {
        if self.no_ack {
            return Err(ConfigError::AutoAckEnabled);
        }
        if self.urls.iter().any(|u| u.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "urls".to_string(),
                reason: "broker URL must not be blank".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "connect_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.startup_retry_budget == Some(0) {
            return Err(ConfigError::Invalid {
                key: "startup_retry_budget".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(ConnectionManager {
            broker: self.broker,
            urls: self.urls,
            backoff: self.backoff,
            connect_timeout: self.connect_timeout,
            startup_retry_budget: self.startup_retry_budget,
            state,
            callbacks: Mutex::new(Vec::new()),
            ever_connected: AtomicBool::new(false),
            connections: AtomicU64::new(0),
        })
    }
}

/// Strip credentials from a broker URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        },
        _ => url.to_string(),
    }
}
