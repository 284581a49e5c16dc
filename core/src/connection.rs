//! Connection state owned by the connection manager.

use std::fmt;

/// Lifecycle of the single logical broker connection.
///
/// ```text
/// Disconnected ──► Connecting ──► Connected ──► Draining ──► Disconnected
///       ▲               │             │
///       └───────────────┴─────────────┘   (failure / connection lost)
/// ```
///
/// Binding and dispatch only happen while `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection; initial and final state
    #[default]
    Disconnected,
    /// A connection attempt (or backoff between attempts) is in progress
    Connecting,
    /// A channel is open and may be bound
    Connected,
    /// Shutdown in progress: no new deliveries, in-flight work finishing
    Draining,
}

impl ConnectionState {
    /// Whether a channel is open for binding and dispatch.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric encoding for the connection state gauge.
    ///
    /// 0 = disconnected, 1 = connecting, 2 = connected, 3 = draining
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Draining => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_allows_binding() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Draining.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
