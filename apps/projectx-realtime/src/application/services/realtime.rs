//! Realtime Service - facade over the market and user hubs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::application::error::RealtimeError;
use crate::application::ports::{CredentialSupplier, ErrorSink, StatusHook, TracingErrorSink};
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::topic::HubKind;
use crate::infrastructure::config::RealtimeConfig;
use crate::infrastructure::hub::{Hub, MarketHub, UserHub};
use crate::infrastructure::signalr::{ConnectionSettings, HubConnection};

/// Owns the market and user hubs and their lifecycle.
///
/// Hubs are built on first access, so a caller that only streams market data
/// never opens the user hub. `start()` connects every hub built so far (and
/// builds both); `stop()` disconnects them and clears all subscriptions.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use projectx_realtime::{RealtimeConfig, RealtimeService, StaticToken};
///
/// # async fn run() -> Result<(), projectx_realtime::RealtimeError> {
/// let service = RealtimeService::new(RealtimeConfig::default(), Arc::new(StaticToken::new("jwt")));
///
/// service.market().subscribe_quotes("CON.F.US.ENQ.H25", |contract, quote| {
///     println!("{contract}: {quote}");
///     Ok(())
/// });
///
/// service.start().await?;
/// // ...
/// service.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct RealtimeService {
    config: RealtimeConfig,
    credentials: Arc<dyn CredentialSupplier>,
    error_sink: Arc<dyn ErrorSink>,
    market: OnceLock<MarketHub>,
    user: OnceLock<UserHub>,
    status_hooks: RwLock<Vec<StatusHook>>,
    started: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RealtimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeService")
            .field("environment", &self.config.environment)
            .field("market", &self.market.get())
            .field("user", &self.user.get())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl RealtimeService {
    /// Create a service that reports callback failures through `tracing`.
    #[must_use]
    pub fn new(config: RealtimeConfig, credentials: Arc<dyn CredentialSupplier>) -> Self {
        Self::with_error_sink(config, credentials, Arc::new(TracingErrorSink))
    }

    /// Create a service with a custom error sink.
    #[must_use]
    pub fn with_error_sink(
        config: RealtimeConfig,
        credentials: Arc<dyn CredentialSupplier>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            config,
            credentials,
            error_sink,
            market: OnceLock::new(),
            user: OnceLock::new(),
            status_hooks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Get the market hub, building it on first access.
    pub fn market(&self) -> &MarketHub {
        self.market.get_or_init(|| {
            let connection = self.build_connection(HubKind::Market);
            MarketHub::new(connection, Arc::clone(&self.error_sink), self.config.auto_connect)
        })
    }

    /// Get the user hub, building it on first access.
    pub fn user(&self) -> &UserHub {
        self.user.get_or_init(|| {
            let connection = self.build_connection(HubKind::User);
            UserHub::new(connection, Arc::clone(&self.error_sink), self.config.auto_connect)
        })
    }

    /// Register a status hook for both hubs, including hubs built later.
    pub fn on_status<F>(&self, hook: F)
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let hook: StatusHook = Arc::new(hook);
        // Hold the write lock so a concurrently built hub sees the hook exactly once.
        let mut hooks = self.status_hooks.write();
        if let Some(market) = self.market.get() {
            market.on_status(Arc::clone(&hook));
        }
        if let Some(user) = self.user.get() {
            user.on_status(Arc::clone(&hook));
        }
        hooks.push(hook);
    }

    /// Check whether `start()` has completed without a matching `stop()`.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Connect both hubs concurrently.
    ///
    /// Idempotent: a second call while started does nothing. Returns the first
    /// connect failure; a hub that failed keeps retrying in the background
    /// until `stop()`.
    pub async fn start(&self) -> Result<(), RealtimeError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_started() {
            return Ok(());
        }

        let user = self.user();
        let market = self.market();
        tracing::info!(environment = self.config.environment.as_str(), "Starting realtime hubs");

        let (user_result, market_result) = tokio::join!(user.connect(), market.connect());

        self.started.store(true, Ordering::Release);
        user_result.and(market_result)
    }

    /// Disconnect both hubs and clear every subscription.
    ///
    /// Covers hubs opened lazily by a subscription as well as those opened by
    /// `start()`. A no-op when neither happened.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_started() && !self.lazily_opened() {
            return;
        }

        tracing::info!(started = self.is_started(), "Stopping realtime hubs");
        let market = self.market.get();
        let user = self.user.get();
        tokio::join!(
            async {
                if let Some(market) = market {
                    market.disconnect().await;
                    market.clear();
                }
            },
            async {
                if let Some(user) = user {
                    user.disconnect().await;
                    user.clear();
                }
            }
        );

        self.started.store(false, Ordering::Release);
    }

    /// Whether a subscription has opened (or is opening) a hub outside `start()`.
    fn lazily_opened(&self) -> bool {
        self.market.get().is_some_and(|market| self.hub_opened(market))
            || self.user.get().is_some_and(|user| self.hub_opened(user))
    }

    fn hub_opened(&self, hub: &Hub) -> bool {
        !matches!(hub.state(), ConnectionState::Disconnected | ConnectionState::Closed)
            || (self.config.auto_connect && !hub.desired_topics().is_empty())
    }

    fn build_connection(&self, hub: HubKind) -> Arc<HubConnection> {
        let connection = HubConnection::new(
            hub,
            self.config.hub_url(hub),
            Arc::clone(&self.credentials),
            ConnectionSettings::from_realtime_config(&self.config),
        );
        for hook in self.status_hooks.read().iter() {
            connection.on_status(Arc::clone(hook));
        }
        Arc::new(connection)
    }
}

impl Drop for RealtimeService {
    fn drop(&mut self) {
        if let Some(market) = self.market.get() {
            market.connection().close();
        }
        if let Some(user) = self.user.get() {
            user.connection().close();
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::StaticToken;

    fn offline_service() -> RealtimeService {
        let config = RealtimeConfig {
            auto_connect: false,
            ..RealtimeConfig::default()
        };
        RealtimeService::new(config, Arc::new(StaticToken::new("t")))
    }

    #[test]
    fn hubs_are_built_lazily() {
        let service = offline_service();
        assert!(service.market.get().is_none());
        assert!(service.user.get().is_none());

        let market = service.market();
        assert_eq!(market.kind(), HubKind::Market);
        assert!(service.user.get().is_none());
        assert!(std::ptr::eq(market, service.market()));
    }

    #[test]
    fn hubs_use_configured_urls() {
        let service = offline_service();
        assert_eq!(
            service.market().connection().url(),
            "https://gateway-rtc-demo.s2f.projectx.com/hubs/market"
        );
        assert_eq!(
            service.user().connection().url(),
            "https://gateway-rtc-demo.s2f.projectx.com/hubs/user"
        );
    }

    #[tokio::test]
    async fn stop_when_not_started_is_noop() {
        let service = offline_service();
        service.market().subscribe_quotes("C", |_, _| Ok(()));

        service.stop().await;

        assert!(!service.is_started());
        assert_eq!(service.market().desired_topics().len(), 1);
    }

    #[tokio::test]
    async fn stop_clears_hub_opened_by_subscription() {
        let config = RealtimeConfig {
            market_hub_url: "http://127.0.0.1:9/hubs/market".to_string(),
            ..RealtimeConfig::default()
        };
        let service = RealtimeService::new(config, Arc::new(StaticToken::new("t")));
        service.market().subscribe_quotes("C", |_, _| Ok(()));
        assert!(service.lazily_opened());

        service.stop().await;

        assert!(service.market().desired_topics().is_empty());
        assert_eq!(service.market().state(), ConnectionState::Disconnected);
        assert!(!service.lazily_opened());
    }

    #[test]
    fn drop_closes_built_hubs() {
        let service = offline_service();
        let connection = Arc::clone(service.market().connection());

        drop(service);

        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn status_hook_reaches_hubs_built_before_and_after() {
        let service = offline_service();
        let market = Arc::clone(service.market().connection());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        service.on_status(move |status| captured.lock().push(status.hub));
        let user = Arc::clone(service.user().connection());

        market.close();
        user.close();

        assert_eq!(*seen.lock(), vec![HubKind::Market, HubKind::User]);
    }
}
