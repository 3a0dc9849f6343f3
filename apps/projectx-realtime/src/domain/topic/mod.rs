//! Subscription Topics
//!
//! A topic is a `(kind, key)` pair naming one real-time stream: quotes for a
//! contract, orders for an account, and so on. Each kind belongs to exactly
//! one hub and maps to a fixed set of wire names.
//!
//! | Kind           | Hub    | Subscribe                      | Inbound event         |
//! |----------------|--------|--------------------------------|-----------------------|
//! | `MarketQuote`  | market | `SubscribeContractQuotes`      | `GatewayQuote`        |
//! | `MarketTrade`  | market | `SubscribeContractTrades`      | `GatewayTrade`        |
//! | `MarketDepth`  | market | `SubscribeContractMarketDepth` | `GatewayDepth`        |
//! | `UserOrder`    | user   | `SubscribeOrders`              | `GatewayUserOrder`    |
//! | `UserPosition` | user   | `SubscribePositions`           | `GatewayUserPosition` |
//! | `UserTrade`    | user   | `SubscribeTrades`              | `GatewayUserTrade`    |
//! | `UserAccount`  | user   | `SubscribeAccount`             | `GatewayUserAccount`  |
//!
//! Every `Subscribe*` method has an `Unsubscribe*` counterpart.

use std::fmt;

use serde_json::Value;

// =============================================================================
// Hub Kind
// =============================================================================

/// The two streaming hubs exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HubKind {
    /// Per-contract market data.
    Market,
    /// Per-account order, position, trade and account updates.
    User,
}

impl HubKind {
    /// Get the hub name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::User => "user",
        }
    }

    /// Get the URL path of the hub relative to the real-time host.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Market => "/hubs/market",
            Self::User => "/hubs/user",
        }
    }

    /// Get the topic kinds served by this hub.
    #[must_use]
    pub const fn topic_kinds(&self) -> &'static [TopicKind] {
        match self {
            Self::Market => &[
                TopicKind::MarketQuote,
                TopicKind::MarketTrade,
                TopicKind::MarketDepth,
            ],
            Self::User => &[
                TopicKind::UserOrder,
                TopicKind::UserPosition,
                TopicKind::UserTrade,
                TopicKind::UserAccount,
            ],
        }
    }
}

impl fmt::Display for HubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Topic Kind
// =============================================================================

/// The kind of a subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicKind {
    /// Best bid/offer and last price for a contract.
    MarketQuote,
    /// Executed trades for a contract.
    MarketTrade,
    /// Order book depth for a contract.
    MarketDepth,
    /// Order updates for an account.
    UserOrder,
    /// Position updates for an account.
    UserPosition,
    /// Fill updates for an account.
    UserTrade,
    /// Balance and status updates for an account.
    UserAccount,
}

impl TopicKind {
    /// Get all topic kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::MarketQuote,
            Self::MarketTrade,
            Self::MarketDepth,
            Self::UserOrder,
            Self::UserPosition,
            Self::UserTrade,
            Self::UserAccount,
        ]
    }

    /// Get the hub that carries this kind.
    #[must_use]
    pub const fn hub(&self) -> HubKind {
        match self {
            Self::MarketQuote | Self::MarketTrade | Self::MarketDepth => HubKind::Market,
            Self::UserOrder | Self::UserPosition | Self::UserTrade | Self::UserAccount => {
                HubKind::User
            }
        }
    }

    /// Get the hub method that subscribes to this kind.
    #[must_use]
    pub const fn subscribe_method(&self) -> &'static str {
        match self {
            Self::MarketQuote => "SubscribeContractQuotes",
            Self::MarketTrade => "SubscribeContractTrades",
            Self::MarketDepth => "SubscribeContractMarketDepth",
            Self::UserOrder => "SubscribeOrders",
            Self::UserPosition => "SubscribePositions",
            Self::UserTrade => "SubscribeTrades",
            Self::UserAccount => "SubscribeAccount",
        }
    }

    /// Get the hub method that unsubscribes from this kind.
    #[must_use]
    pub const fn unsubscribe_method(&self) -> &'static str {
        match self {
            Self::MarketQuote => "UnsubscribeContractQuotes",
            Self::MarketTrade => "UnsubscribeContractTrades",
            Self::MarketDepth => "UnsubscribeContractMarketDepth",
            Self::UserOrder => "UnsubscribeOrders",
            Self::UserPosition => "UnsubscribePositions",
            Self::UserTrade => "UnsubscribeTrades",
            Self::UserAccount => "UnsubscribeAccount",
        }
    }

    /// Get the name of the inbound event that carries this kind.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::MarketQuote => "GatewayQuote",
            Self::MarketTrade => "GatewayTrade",
            Self::MarketDepth => "GatewayDepth",
            Self::UserOrder => "GatewayUserOrder",
            Self::UserPosition => "GatewayUserPosition",
            Self::UserTrade => "GatewayUserTrade",
            Self::UserAccount => "GatewayUserAccount",
        }
    }

    /// Look up the kind carried by an inbound event name.
    #[must_use]
    pub fn from_event_name(event: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.event_name() == event)
    }

    /// Payload field holding the topic key when an event carries only the
    /// payload object.
    #[must_use]
    pub const fn key_field(&self) -> &'static str {
        match self {
            Self::MarketQuote | Self::MarketTrade | Self::MarketDepth => "contractId",
            Self::UserOrder | Self::UserPosition | Self::UserTrade => "accountId",
            Self::UserAccount => "id",
        }
    }

    /// Get the kind name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarketQuote => "market_quote",
            Self::MarketTrade => "market_trade",
            Self::MarketDepth => "market_depth",
            Self::UserOrder => "user_order",
            Self::UserPosition => "user_position",
            Self::UserTrade => "user_trade",
            Self::UserAccount => "user_account",
        }
    }
}

// =============================================================================
// Topic
// =============================================================================

/// An immutable `(kind, key)` subscription target.
///
/// The key is a contract id for market kinds and an account id for user
/// kinds. Equality is by both parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    kind: TopicKind,
    key: String,
}

impl Topic {
    /// Create a topic.
    ///
    /// Integer account ids are stored in canonical decimal (`"007"` becomes
    /// `"7"`), the form the gateway echoes back on events.
    #[must_use]
    pub fn new(kind: TopicKind, key: impl Into<String>) -> Self {
        let key = key.into();
        let key = match kind.hub() {
            HubKind::User => key.parse::<i64>().map_or(key, |id| id.to_string()),
            HubKind::Market => key,
        };
        Self { kind, key }
    }

    /// Quotes for a contract.
    #[must_use]
    pub fn market_quote(contract_id: impl Into<String>) -> Self {
        Self::new(TopicKind::MarketQuote, contract_id)
    }

    /// Trades for a contract.
    #[must_use]
    pub fn market_trade(contract_id: impl Into<String>) -> Self {
        Self::new(TopicKind::MarketTrade, contract_id)
    }

    /// Market depth for a contract.
    #[must_use]
    pub fn market_depth(contract_id: impl Into<String>) -> Self {
        Self::new(TopicKind::MarketDepth, contract_id)
    }

    /// Order updates for an account.
    #[must_use]
    pub fn user_order(account_id: impl Into<String>) -> Self {
        Self::new(TopicKind::UserOrder, account_id)
    }

    /// Position updates for an account.
    #[must_use]
    pub fn user_position(account_id: impl Into<String>) -> Self {
        Self::new(TopicKind::UserPosition, account_id)
    }

    /// Trade updates for an account.
    #[must_use]
    pub fn user_trade(account_id: impl Into<String>) -> Self {
        Self::new(TopicKind::UserTrade, account_id)
    }

    /// Account updates for an account.
    #[must_use]
    pub fn user_account(account_id: impl Into<String>) -> Self {
        Self::new(TopicKind::UserAccount, account_id)
    }

    /// Get the topic kind.
    #[must_use]
    pub const fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Get the topic key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the hub that carries this topic.
    #[must_use]
    pub const fn hub(&self) -> HubKind {
        self.kind.hub()
    }

    /// Argument sent with the subscribe/unsubscribe invoke.
    ///
    /// Account ids travel as JSON numbers when they are integers; contract
    /// ids are always strings.
    #[must_use]
    pub fn invoke_argument(&self) -> Value {
        match self.kind.hub() {
            HubKind::User => self
                .key
                .parse::<i64>()
                .map_or_else(|_| Value::String(self.key.clone()), Value::from),
            HubKind::Market => Value::String(self.key.clone()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind.as_str(), self.key)
    }
}

/// Render an inbound key argument as a topic key.
///
/// Strings are used verbatim and numbers in decimal; anything else has no key.
#[must_use]
pub fn key_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
