//! Connection State
//!
//! Lifecycle of one hub transport and the status records reported to
//! observers on every transition.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                 │
//!      │                     failed          lost (unexpected)
//!      │                        ▼                 ▼
//!      └────disconnect───── (any state) ◄──── Reconnecting ──ok──► Connected
//!
//! close() from any state ──► Closed (terminal)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::topic::HubKind;

/// State of a hub transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Handshake completed; invokes may be sent.
    Connected,
    /// Connection lost; retrying with backoff.
    Reconnecting,
    /// Permanently shut down.
    Closed,
}

impl ConnectionState {
    /// Get the state name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }

    /// Check whether a connect attempt is in flight.
    #[must_use]
    pub const fn is_transitional(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Check whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition reported to status hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Hub whose transport changed state.
    pub hub: HubKind,
    /// New state.
    pub state: ConnectionState,
    /// Reconnect attempt number (0 outside of reconnects).
    pub attempt: u32,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl ConnectionStatus {
    /// Create a status stamped with the current time.
    #[must_use]
    pub fn now(hub: HubKind, state: ConnectionState, attempt: u32) -> Self {
        Self {
            hub,
            state,
            attempt,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn transitional_states() {
        assert!(ConnectionState::Connecting.is_transitional());
        assert!(ConnectionState::Reconnecting.is_transitional());
        assert!(!ConnectionState::Connected.is_transitional());
        assert!(!ConnectionState::Disconnected.is_transitional());
    }

    #[test]
    fn only_closed_is_terminal() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }

    #[test]
    fn status_carries_hub_and_attempt() {
        let before = Utc::now();
        let status = ConnectionStatus::now(HubKind::User, ConnectionState::Reconnecting, 3);

        assert_eq!(status.hub, HubKind::User);
        assert_eq!(status.state.to_string(), "reconnecting");
        assert_eq!(status.attempt, 3);
        assert!(status.at >= before);
    }
}
