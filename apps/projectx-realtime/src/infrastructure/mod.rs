//! Infrastructure Layer
//!
//! Adapters between the gateway and the application layer:
//!
//! - **Transport**
//!   - `signalr/`: SignalR JSON protocol, hub connection, backoff
//!   - `hub/`: market and user topic multiplexers
//!
//! - **Cross-cutting**
//!   - `config/`: environment-driven configuration
//!   - `metrics/`: Prometheus counters and gauges
//!   - `telemetry/`: tracing subscriber and optional OTLP export

pub mod config;
pub mod hub;
pub mod metrics;
pub mod signalr;
pub mod telemetry;
