#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! ProjectX Realtime - Gateway Streaming Client
//!
//! Maintains the two ProjectX gateway hub connections (SignalR over
//! WebSocket), multiplexes per-contract and per-account topics over them and
//! dispatches pushed events to registered callbacks. Subscriptions survive
//! reconnects: every topic a caller asked for is re-sent exactly once on each
//! new connection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `topic`: hub kinds, topic kinds and their wire names
//!   - `connection`: connection state machine values
//!   - `subscription`: the thread-safe topic → callbacks registry
//!
//! - **Application**: Ports and the service facade
//!   - `ports`: `CredentialSupplier`, `ErrorSink`, `StatusHook`
//!   - `services`: `RealtimeService`
//!
//! - **Infrastructure**: Adapters
//!   - `signalr`: protocol codec, hub connection, reconnect policy
//!   - `hub`: market and user hubs
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────┐     ┌─────────────┐
//! wss://.../hubs/market ─►│ HubConnection│────►│  MarketHub  │──► quote/trade/depth callbacks
//!                        └──────────────┘     └─────────────┘
//!                        ┌──────────────┐     ┌─────────────┐
//! wss://.../hubs/user ───►│ HubConnection│────►│   UserHub   │──► order/position/trade/account callbacks
//!                        └──────────────┘     └─────────────┘
//!                               ▲                    │
//!                               └── subscribe invokes ┘ (resent on every Connected)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Topics, connection states and the subscription registry.
pub mod domain;

/// Application layer - Ports, errors and the realtime service.
pub mod application;

/// Infrastructure layer - SignalR transport, hubs and ambient adapters.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStatus};
pub use domain::subscription::{
    Callback, CallbackError, CallbackResult, RegistryStats, SubscriptionHandle,
    SubscriptionRegistry,
};
pub use domain::topic::{HubKind, Topic, TopicKind};

// Application
pub use application::error::{AuthenticationError, RealtimeError};
pub use application::ports::{
    CredentialSupplier, ErrorSink, SharedToken, StaticToken, StatusHook, TracingErrorSink,
};
pub use application::services::RealtimeService;

// Infrastructure config
pub use infrastructure::config::{ConfigError, Environment, RealtimeConfig, RunnerSettings};

// Hubs and transport
pub use infrastructure::hub::{Hub, MarketHub, UserHub};
pub use infrastructure::signalr::{ConnectionSettings, HubConnection, ReconnectPolicy};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
