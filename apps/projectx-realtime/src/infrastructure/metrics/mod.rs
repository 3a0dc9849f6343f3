//! Prometheus Metrics Module
//!
//! Hub traffic and connection metrics recorded through the `metrics` facade.
//! Recording is unconditional; without an installed recorder every call is a
//! no-op, so the library never requires an exporter.
//!
//! # Metrics Categories
//!
//! - **Events**: inbound events received, and those dropped for lack of a
//!   matching topic
//! - **Invokes**: subscribe/unsubscribe calls sent
//! - **Connections**: connected flag and reconnect count per hub
//! - **Subscriptions**: size of each hub's Desired set
//! - **Errors**: callback failures caught at the dispatch boundary

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::topic::HubKind;

// =============================================================================
// Exporter
// =============================================================================

static LISTEN_ADDR: OnceLock<SocketAddr> = OnceLock::new();

/// Metrics exporter errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus recorder or its listener could not be installed.
    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Must be called inside a Tokio runtime. Later calls are no-ops that return
/// the address of the first listener.
pub fn init_metrics(port: u16) -> Result<SocketAddr, MetricsError> {
    if let Some(addr) = LISTEN_ADDR.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(*LISTEN_ADDR.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "projectx_realtime_events_received_total",
        "Total inbound hub events by hub and event name"
    );
    describe_counter!(
        "projectx_realtime_events_unmatched_total",
        "Inbound events dropped because no topic matched their key"
    );
    describe_counter!(
        "projectx_realtime_callback_errors_total",
        "Callbacks that returned an error or panicked"
    );
    describe_counter!(
        "projectx_realtime_reconnects_total",
        "Successful reconnects after an unexpected disconnect"
    );
    describe_counter!(
        "projectx_realtime_invokes_sent_total",
        "Subscribe/unsubscribe invokes sent by hub and target"
    );

    describe_gauge!(
        "projectx_realtime_connected",
        "Whether the hub transport is connected (1) or not (0)"
    );
    describe_gauge!(
        "projectx_realtime_desired_topics",
        "Number of topics in the hub's Desired set"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound event.
pub fn record_event_received(hub: HubKind, event: &'static str) {
    counter!(
        "projectx_realtime_events_received_total",
        "hub" => hub.as_str(),
        "event" => event
    )
    .increment(1);
}

/// Record an inbound event dropped for lack of a matching topic.
pub fn record_event_unmatched(hub: HubKind, event: &'static str) {
    counter!(
        "projectx_realtime_events_unmatched_total",
        "hub" => hub.as_str(),
        "event" => event
    )
    .increment(1);
}

/// Record a failed callback.
pub fn record_callback_error(hub: HubKind) {
    counter!("projectx_realtime_callback_errors_total", "hub" => hub.as_str()).increment(1);
}

/// Record a successful reconnect.
pub fn record_reconnect(hub: HubKind) {
    counter!("projectx_realtime_reconnects_total", "hub" => hub.as_str()).increment(1);
}

/// Record an invoke sent on the wire.
pub fn record_invoke_sent(hub: HubKind, target: &'static str) {
    counter!(
        "projectx_realtime_invokes_sent_total",
        "hub" => hub.as_str(),
        "target" => target
    )
    .increment(1);
}

/// Update the connected flag of a hub.
pub fn set_connected(hub: HubKind, connected: bool) {
    gauge!("projectx_realtime_connected", "hub" => hub.as_str()).set(if connected {
        1.0
    } else {
        0.0
    });
}

/// Update the Desired set size of a hub.
#[allow(clippy::cast_precision_loss)]
pub fn set_desired_topics(hub: HubKind, count: usize) {
    gauge!("projectx_realtime_desired_topics", "hub" => hub.as_str()).set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
