//! Prometheus metrics for the consumer.
//!
//! Components record through the `metrics` facade; [`MetricsRecorder`] installs
//! the Prometheus recorder so the values can be rendered in exposition format.
//!
//! # Example
//!
//! ```rust,no_run
//! use notifier_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use notifier_core::ConnectionState;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders its output.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; [`render`](Self::render) then returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "notifier_deliveries_total",
        "Deliveries settled, labelled by outcome (acked, requeued, rejected, unroutable, poison, dead_lettered)"
    );
    describe_histogram!(
        "notifier_handler_duration_seconds",
        "Time spent in event handlers"
    );
    describe_counter!(
        "notifier_handler_failures_total",
        "Handler invocations that failed, timed out or panicked"
    );
    describe_counter!(
        "notifier_drain_requeued_total",
        "Deliveries requeued because they were still unsettled at drain"
    );

    describe_gauge!(
        "notifier_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=connected, 3=draining)"
    );
    describe_counter!(
        "notifier_connection_transitions_total",
        "Connection state transitions, labelled by target state"
    );
    describe_counter!(
        "notifier_reconnect_attempts_total",
        "Failed connection attempts that scheduled a retry"
    );

    describe_gauge!(
        "notifier_dead_letters_recorded",
        "Entries in the in-process dead letter record queue"
    );
    describe_counter!(
        "notifier_dead_letters_dropped_total",
        "Dead letter records dropped because the record queue was full"
    );
    describe_gauge!(
        "notifier_in_flight_deliveries",
        "Deliveries received but not yet settled"
    );
}

/// Delivery metrics recorder.
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record a settled delivery.
    pub fn record_outcome(outcome: &'static str) {
        counter!("notifier_deliveries_total", "outcome" => outcome).increment(1);
    }

    /// Record a handler invocation.
    pub fn record_handler(duration: Duration, failed: bool) {
        histogram!("notifier_handler_duration_seconds").record(duration.as_secs_f64());
        if failed {
            counter!("notifier_handler_failures_total").increment(1);
        }
    }

    /// Record deliveries requeued at drain.
    pub fn record_drain_requeued(count: usize) {
        counter!("notifier_drain_requeued_total").increment(count as u64);
    }

    /// Record the number of unsettled deliveries.
    pub fn record_in_flight(count: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("notifier_in_flight_deliveries").set(count as f64);
    }
}

/// Connection metrics recorder.
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Record a state transition.
    pub fn record_state(state: ConnectionState) {
        gauge!("notifier_connection_state").set(state.as_gauge());
        counter!("notifier_connection_transitions_total", "state" => state.to_string()).increment(1);
    }

    /// Record a failed connection attempt that will be retried.
    pub fn record_reconnect_attempt() {
        counter!("notifier_reconnect_attempts_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_starts_uninstalled() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.render().is_none());
    }

    #[test]
    fn test_install_is_idempotent() {
        let mut first = MetricsRecorder::new();
        assert!(first.install().is_ok());

        let mut second = MetricsRecorder::new();
        assert!(second.install().is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        DeliveryMetrics::record_outcome("acked");
        DeliveryMetrics::record_handler(Duration::from_millis(5), true);
        ConnectionMetrics::record_state(ConnectionState::Connected);
        ConnectionMetrics::record_reconnect_attempt();
    }
}
