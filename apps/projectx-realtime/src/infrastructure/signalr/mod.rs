//! SignalR Hub Transport
//!
//! Client side of the gateway's SignalR hubs over WebSocket:
//!
//! - **codec**: JSON hub protocol records (handshake, invocations, pings)
//! - **endpoint**: hub URL resolution with the bearer token
//! - **reconnect**: exponential backoff with jitter
//! - **connection**: the persistent, self-healing hub connection
//!   (keep-alive and server-timeout detection live in its frame pump)

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod reconnect;

pub use codec::{CodecError, HubMessage, RECORD_SEPARATOR, SignalRCodec};
pub use connection::{ConnectionSettings, EventHandler, HubConnection, StateListener};
pub use endpoint::hub_endpoint;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
