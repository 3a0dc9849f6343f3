//! Application Services
//!
//! Long-lived services that own hub connections and their lifecycle.

mod realtime;

pub use realtime::RealtimeService;
