//! Port Interfaces
//!
//! Contracts between the real-time layer and the rest of the client.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialSupplier`: hands out the current bearer token on every
//!   connect attempt
//! - `ErrorSink`: receives callback failures caught at the dispatch boundary
//! - `StatusHook`: observes connection state transitions

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::error::{AuthenticationError, RealtimeError};
use crate::domain::connection::ConnectionStatus;

// =============================================================================
// Credential Supplier
// =============================================================================

/// Supplies a bearer token on demand.
///
/// The transports query this at the start of every connect and reconnect
/// attempt and never cache the result, so a refreshed token is picked up on
/// the next attempt.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    /// Get the current bearer token.
    async fn get_token(&self) -> Result<String, AuthenticationError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken").field(&"[REDACTED]").finish()
    }
}

#[async_trait]
impl CredentialSupplier for StaticToken {
    async fn get_token(&self) -> Result<String, AuthenticationError> {
        if self.0.is_empty() {
            return Err(AuthenticationError::MissingToken);
        }
        Ok(self.0.clone())
    }
}

/// A token slot shared with whatever refreshes the session.
///
/// Clones share the slot; `set` on one is visible to all.
#[derive(Clone, Default)]
pub struct SharedToken {
    slot: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot holding a token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        let shared = Self::new();
        shared.set(token);
        shared
    }

    /// Replace the token.
    pub fn set(&self, token: impl Into<String>) {
        *self.slot.write() = Some(token.into());
    }

    /// Empty the slot (e.g. on logout).
    pub fn clear(&self) {
        *self.slot.write() = None;
    }
}

impl std::fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedToken")
            .field("present", &self.slot.read().is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialSupplier for SharedToken {
    async fn get_token(&self) -> Result<String, AuthenticationError> {
        self.slot
            .read()
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(AuthenticationError::MissingToken)
    }
}

// =============================================================================
// Error Sink
// =============================================================================

/// Receives errors that are caught rather than propagated.
pub trait ErrorSink: Send + Sync {
    /// Report one error.
    fn report(&self, error: &RealtimeError);
}

impl<F> ErrorSink for F
where
    F: Fn(&RealtimeError) + Send + Sync,
{
    fn report(&self, error: &RealtimeError) {
        self(error);
    }
}

/// Default sink: logs at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &RealtimeError) {
        tracing::error!(error = %error, "Realtime callback failed");
    }
}

// =============================================================================
// Status Hook
// =============================================================================

/// Observer of connection state transitions.
pub type StatusHook = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::topic::HubKind;

    #[test]
    fn static_token_returns_token() {
        let supplier = StaticToken::new("jwt");
        let token = tokio_test::assert_ok!(tokio_test::block_on(supplier.get_token()));
        assert_eq!(token, "jwt");
    }

    #[tokio::test]
    async fn static_token_empty_is_missing() {
        let supplier = StaticToken::new("");
        assert_eq!(
            supplier.get_token().await,
            Err(AuthenticationError::MissingToken)
        );
    }

    #[tokio::test]
    async fn shared_token_sees_refresh() {
        let supplier = SharedToken::new();
        let refresher = supplier.clone();

        assert_eq!(
            supplier.get_token().await,
            Err(AuthenticationError::MissingToken)
        );

        refresher.set("first");
        assert_eq!(supplier.get_token().await.unwrap(), "first");

        refresher.set("second");
        assert_eq!(supplier.get_token().await.unwrap(), "second");

        refresher.clear();
        tokio_test::assert_err!(supplier.get_token().await);
    }

    #[test]
    fn token_debug_is_redacted() {
        assert!(!format!("{:?}", StaticToken::new("secret")).contains("secret"));
        assert!(!format!("{:?}", SharedToken::with_token("secret")).contains("secret"));
    }

    #[test]
    fn closure_is_an_error_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = move |error: &RealtimeError| captured.lock().unwrap().push(error.clone());

        sink.report(&RealtimeError::NotConnected { hub: HubKind::User });

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
