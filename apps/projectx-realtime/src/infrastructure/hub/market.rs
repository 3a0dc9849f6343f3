//! Market hub: per-contract quotes, trades and depth.

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;

use super::Hub;
use crate::application::ports::ErrorSink;
use crate::domain::subscription::{CallbackResult, SubscriptionHandle};
use crate::domain::topic::{HubKind, Topic};
use crate::infrastructure::signalr::HubConnection;

/// Market data hub.
#[derive(Debug)]
pub struct MarketHub {
    hub: Hub,
}

impl MarketHub {
    /// Create the market hub over its connection.
    #[must_use]
    pub fn new(
        connection: Arc<HubConnection>,
        error_sink: Arc<dyn ErrorSink>,
        auto_connect: bool,
    ) -> Self {
        debug_assert_eq!(connection.hub(), HubKind::Market);
        Self {
            hub: Hub::new(connection, error_sink, auto_connect),
        }
    }

    /// Subscribe to quotes for a contract (`GatewayQuote`).
    pub fn subscribe_quotes<F>(&self, contract_id: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::market_quote(contract_id), Arc::new(callback))
    }

    /// Subscribe to trades for a contract (`GatewayTrade`).
    pub fn subscribe_trades<F>(&self, contract_id: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::market_trade(contract_id), Arc::new(callback))
    }

    /// Subscribe to market depth for a contract (`GatewayDepth`).
    pub fn subscribe_market_depth<F>(
        &self,
        contract_id: impl Into<String>,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::market_depth(contract_id), Arc::new(callback))
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_quotes(
        &self,
        contract_id: impl Into<String>,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::market_quote(contract_id), handle)
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_trades(
        &self,
        contract_id: impl Into<String>,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::market_trade(contract_id), handle)
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_market_depth(
        &self,
        contract_id: impl Into<String>,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::market_depth(contract_id), handle)
    }
}

impl Deref for MarketHub {
    type Target = Hub;

    fn deref(&self) -> &Self::Target {
        &self.hub
    }
}
