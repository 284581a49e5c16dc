//! Health reporting for the consumer.
//!
//! A report holds one check per [`Component`]. The broker connection is
//! unhealthy unless connected. The dead letter record queue is degraded once
//! more than half full and unhealthy when full, since further records are
//! dropped.

use chrono::{DateTime, Utc};
use notifier_core::ConnectionState;
use std::fmt;

/// Health status, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating, but attention is needed
    Degraded,
    /// Not consuming
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Part of the consumer a check describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Broker connection
    Connection,
    /// In-process dead letter record queue
    DeadLetters,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::DeadLetters => "dead_letters",
        })
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Component checked
    pub component: Component,
    /// Its status
    pub status: HealthStatus,
    /// Human-readable detail
    pub detail: String,
}

impl HealthCheck {
    /// Check the broker connection.
    #[must_use]
    pub fn connection(state: ConnectionState, connections: u64) -> Self {
        let status = if state.is_connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            component: Component::Connection,
            status,
            detail: format!("{state} ({connections} connections established)"),
        }
    }

    /// Check dead letter record usage.
    #[must_use]
    pub fn dead_letters(recorded: usize, capacity: usize) -> Self {
        let status = if recorded >= capacity {
            HealthStatus::Unhealthy
        } else if recorded.saturating_mul(2) > capacity {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            component: Component::DeadLetters,
            status,
            detail: format!("{recorded}/{capacity} recorded"),
        }
    }
}

/// Point-in-time health of a consumer.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Worst status across all checks
    pub status: HealthStatus,
    /// Individual checks
    pub checks: Vec<HealthCheck>,
    /// When the report was taken
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregate checks into a report.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks.iter().map(|c| c.status).max().unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            generated_at: Utc::now(),
        }
    }

    /// Whether every check is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// The check for a component.
    #[must_use]
    pub fn check(&self, component: Component) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == component)
    }
}
