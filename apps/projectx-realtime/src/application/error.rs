//! Realtime Errors
//!
//! Error taxonomy shared by the transports, hubs and service.
//!
//! | Error            | Raised by                  | Surfaced to                         |
//! |------------------|----------------------------|-------------------------------------|
//! | `Authentication` | credential supplier        | first `connect()` caller, else retry |
//! | `Connection`     | transport                  | first `connect()` caller, else retry |
//! | `NotConnected`   | `invoke()`                 | direct caller of `invoke()`          |
//! | `Callback`       | hub dispatch               | the error sink only                  |
//! | `Closed`         | `connect()` after `close()`| direct caller                        |

use crate::domain::topic::HubKind;

/// The credential supplier could not produce a usable token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    /// No token is currently available.
    #[error("no bearer token available")]
    MissingToken,
    /// The supplier refused to hand out a token.
    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// Real-time layer error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// Credential lookup failed for a connect attempt.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Transport-level failure to establish or keep the connection.
    #[error("{hub} hub connection failed: {message}")]
    Connection {
        /// Hub whose transport failed.
        hub: HubKind,
        /// Failure description.
        message: String,
    },

    /// An invoke was attempted while the transport was not connected.
    #[error("{hub} hub is not connected")]
    NotConnected {
        /// Hub that was asked to send.
        hub: HubKind,
    },

    /// A registered callback failed or panicked during dispatch.
    #[error("{hub} hub callback for {event}({key}) failed: {message}")]
    Callback {
        /// Hub that dispatched the event.
        hub: HubKind,
        /// Inbound event name.
        event: String,
        /// Topic key of the event.
        key: String,
        /// Failure description.
        message: String,
    },

    /// The transport was closed and cannot be reused.
    #[error("{hub} hub connection is closed")]
    Closed {
        /// Hub whose transport is closed.
        hub: HubKind,
    },
}

impl RealtimeError {
    /// Build a connection error from any displayable cause.
    pub fn connection(hub: HubKind, cause: impl std::fmt::Display) -> Self {
        Self::Connection {
            hub,
            message: cause.to_string(),
        }
    }
}
