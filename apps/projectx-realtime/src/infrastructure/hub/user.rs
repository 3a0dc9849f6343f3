//! User hub: per-account orders, positions, trades and account updates.
//!
//! Account ids may be given as numbers or strings; they are keyed by their
//! decimal text and sent on the wire as JSON numbers.

use std::ops::Deref;
use std::sync::Arc;

use serde_json::Value;

use super::Hub;
use crate::application::ports::ErrorSink;
use crate::domain::subscription::{CallbackResult, SubscriptionHandle};
use crate::domain::topic::{HubKind, Topic};
use crate::infrastructure::signalr::HubConnection;

/// Account data hub.
#[derive(Debug)]
pub struct UserHub {
    hub: Hub,
}

impl UserHub {
    /// Create the user hub over its connection.
    #[must_use]
    pub fn new(
        connection: Arc<HubConnection>,
        error_sink: Arc<dyn ErrorSink>,
        auto_connect: bool,
    ) -> Self {
        debug_assert_eq!(connection.hub(), HubKind::User);
        Self {
            hub: Hub::new(connection, error_sink, auto_connect),
        }
    }

    /// Subscribe to order updates for an account (`GatewayUserOrder`).
    pub fn subscribe_orders<F>(&self, account_id: impl ToString, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::user_order(account_id.to_string()), Arc::new(callback))
    }

    /// Subscribe to position updates for an account (`GatewayUserPosition`).
    pub fn subscribe_positions<F>(&self, account_id: impl ToString, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::user_position(account_id.to_string()), Arc::new(callback))
    }

    /// Subscribe to fills for an account (`GatewayUserTrade`).
    pub fn subscribe_trades<F>(&self, account_id: impl ToString, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::user_trade(account_id.to_string()), Arc::new(callback))
    }

    /// Subscribe to account updates (`GatewayUserAccount`).
    pub fn subscribe_account<F>(&self, account_id: impl ToString, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) -> CallbackResult + Send + Sync + 'static,
    {
        self.hub
            .subscribe(Topic::user_account(account_id.to_string()), Arc::new(callback))
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_orders(
        &self,
        account_id: impl ToString,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::user_order(account_id.to_string()), handle)
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_positions(
        &self,
        account_id: impl ToString,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::user_position(account_id.to_string()), handle)
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_trades(
        &self,
        account_id: impl ToString,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::user_trade(account_id.to_string()), handle)
    }

    /// Unsubscribe one callback, or all callbacks when `handle` is `None`.
    pub fn unsubscribe_account(
        &self,
        account_id: impl ToString,
        handle: Option<&SubscriptionHandle>,
    ) -> bool {
        self.hub
            .unsubscribe(&Topic::user_account(account_id.to_string()), handle)
    }
}

impl Deref for UserHub {
    type Target = Hub;

    fn deref(&self) -> &Self::Target {
        &self.hub
    }
}
