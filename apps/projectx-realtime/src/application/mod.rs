//! Application Layer
//!
//! Orchestrates the hubs for callers:
//!
//! - **Ports**: credential supply, error reporting and status hooks
//! - **Services**: the `RealtimeService` facade
//! - **Errors**: the realtime error taxonomy

pub mod error;
pub mod ports;
pub mod services;

pub use error::{AuthenticationError, RealtimeError};
pub use ports::*;
pub use services::*;
