//! Exponential backoff for reconnect attempts.
//!
//! # Example
//!
//! ```rust
//! use notifier_runtime::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::builder()
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(30))
//!     .multiplier(2.0)
//!     .jitter(false)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
//! ```

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for the reconnect loop.
///
/// # Default Values
///
/// - `initial_delay`: 500ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
/// - `jitter`: enabled (delay scaled by a random factor in `0.5..=1.0`)
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Whether to randomize delays
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            jitter: None,
        }
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    ///
    /// `min(initial_delay * multiplier^attempt, max_delay)`, scaled by a random
    /// factor in `0.5..=1.0` when jitter is enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        // powi overflows to infinity for large attempts; min() keeps it finite
        let capped_secs = if base_secs.is_finite() {
            base_secs.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };

        Duration::from_secs_f64((capped_secs * factor).max(0.0))
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<bool>,
}

impl BackoffPolicyBuilder {
    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the cap for the exponential delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor per attempt.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the [`BackoffPolicy`].
    ///
    /// A multiplier below 1.0 is raised to 1.0 and a cap below the initial
    /// delay is raised to the initial delay.
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        let initial_delay = self.initial_delay.unwrap_or(Duration::from_millis(500));
        let max_delay = self.max_delay.unwrap_or(Duration::from_secs(30)).max(initial_delay);

        BackoffPolicy {
            initial_delay,
            max_delay,
            multiplier: self.multiplier.unwrap_or(2.0).max(1.0),
            jitter: self.jitter.unwrap_or(true),
        }
    }
}
