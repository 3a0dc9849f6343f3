//! Hubs - Topic multiplexing over one hub connection.
//!
//! A hub owns one `HubConnection` and one `SubscriptionRegistry`. It turns
//! subscribe/unsubscribe calls into wire invokes and routes inbound events to
//! the callbacks of the matching topic.
//!
//! # Desired vs Active
//!
//! - **Desired**: every topic in the registry.
//! - **Active**: the topics whose subscribe invoke was sent on the current
//!   connection.
//!
//! On every transition into `Connected` the hub clears Active and resends one
//! subscribe invoke per Desired topic; on any transition out of `Connected`
//! Active is cleared. The wire lock is held across registry mutation and the
//! invoke, so a topic is never sent twice on one connection and never missed.
//!
//! # Inbound routing
//!
//! ```text
//! GatewayQuote("CON.F.US.ENQ.H25", {...})
//!     └─► Topic(MarketQuote, "CON.F.US.ENQ.H25")
//!             └─► callbacks in registration order
//! ```
//!
//! Events whose key has no topic are dropped and counted.

mod market;
mod user;

use std::collections::{BTreeSet, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

pub use market::MarketHub;
pub use user::UserHub;

use crate::application::error::RealtimeError;
use crate::application::ports::{ErrorSink, StatusHook};
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::{
    Callback, Removal, SubscriptionHandle, SubscriptionRegistry,
};
use crate::domain::topic::{HubKind, Topic, TopicKind, key_from_value};
use crate::infrastructure::metrics;
use crate::infrastructure::signalr::HubConnection;
use crate::infrastructure::signalr::connection::panic_message;

static NO_PAYLOAD: Value = Value::Null;

#[derive(Debug, Default)]
struct WireState {
    connected: bool,
    active: HashSet<Topic>,
}

/// Topic multiplexer over one hub connection.
pub struct Hub {
    kind: HubKind,
    connection: Arc<HubConnection>,
    registry: Arc<SubscriptionRegistry>,
    wire: Arc<Mutex<WireState>>,
    auto_connect: bool,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("kind", &self.kind)
            .field("state", &self.connection.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub over `connection`, registering its event handlers and
    /// its resubscribe-on-connect listener.
    #[must_use]
    pub fn new(
        connection: Arc<HubConnection>,
        error_sink: Arc<dyn ErrorSink>,
        auto_connect: bool,
    ) -> Self {
        let kind = connection.hub();
        let registry = Arc::new(SubscriptionRegistry::new());
        let wire = Arc::new(Mutex::new(WireState::default()));

        for &topic_kind in kind.topic_kinds() {
            let registry = Arc::clone(&registry);
            let error_sink = Arc::clone(&error_sink);
            connection.on(topic_kind.event_name(), move |arguments| {
                route_event(kind, topic_kind, &registry, error_sink.as_ref(), arguments);
            });
        }

        let weak = Arc::downgrade(&connection);
        let listener_registry = Arc::clone(&registry);
        let listener_wire = Arc::clone(&wire);
        connection.on_state_change(move |_previous, next| {
            resync(kind, &weak, &listener_registry, &listener_wire, next);
        });

        Self {
            kind,
            connection,
            registry,
            wire,
            auto_connect,
        }
    }

    /// Get the hub kind.
    #[must_use]
    pub const fn kind(&self) -> HubKind {
        self.kind
    }

    /// Get the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<HubConnection> {
        &self.connection
    }

    /// Get the connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connect the underlying transport.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        self.connection.connect().await
    }

    /// Disconnect the underlying transport. Subscriptions stay Desired.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Register an observability hook for this hub's state transitions.
    pub fn on_status(&self, hook: StatusHook) {
        self.connection.on_status(hook);
    }

    /// Get the Desired set.
    #[must_use]
    pub fn desired_topics(&self) -> BTreeSet<Topic> {
        self.registry.all_topics()
    }

    /// Get the Active set.
    #[must_use]
    pub fn active_topics(&self) -> BTreeSet<Topic> {
        self.wire.lock().active.iter().cloned().collect()
    }

    /// Remove every subscription without sending unsubscribe invokes.
    pub fn clear(&self) {
        let mut wire = self.wire.lock();
        let cleared = self.registry.clear();
        wire.active.clear();
        drop(wire);

        metrics::set_desired_topics(self.kind, 0);
        tracing::debug!(hub = %self.kind, topics = cleared.len(), "Cleared subscriptions");
    }

    /// Register a callback for a topic of this hub.
    ///
    /// Sends the subscribe invoke when the topic is new and the connection is
    /// up; otherwise the topic is sent on the next connect.
    pub(crate) fn subscribe(&self, topic: Topic, callback: Callback) -> SubscriptionHandle {
        debug_assert_eq!(topic.hub(), self.kind);

        let handle = {
            let mut wire = self.wire.lock();
            let registration = self.registry.add(topic.clone(), callback);

            if registration.topic_added && wire.connected && !wire.active.contains(&topic) {
                match send(&self.connection, &topic, topic.kind().subscribe_method()) {
                    Ok(()) => {
                        wire.active.insert(topic.clone());
                    }
                    Err(e) => {
                        tracing::debug!(hub = %self.kind, topic = %topic, error = %e, "Subscribe deferred until connected");
                    }
                }
            }
            registration.handle
        };

        metrics::set_desired_topics(self.kind, self.registry.stats().topics);
        tracing::debug!(hub = %self.kind, topic = %topic, handle = handle.id(), "Subscribed");

        if self.auto_connect {
            self.activate();
        }
        handle
    }

    /// Remove one callback (`handle`) or every callback of a topic.
    ///
    /// Returns true when the topic left the Desired set. An unsubscribe invoke
    /// is sent only for a topic that was Active on a live connection.
    pub(crate) fn unsubscribe(&self, topic: &Topic, handle: Option<&SubscriptionHandle>) -> bool {
        let mut wire = self.wire.lock();

        let removed = match handle {
            Some(handle) if handle.topic() == topic => {
                self.registry.remove(handle) == Removal::TopicRemoved
            }
            Some(handle) => {
                tracing::warn!(hub = %self.kind, topic = %topic, handle = %handle, "Handle belongs to another topic");
                false
            }
            None => self.registry.remove_all(topic),
        };

        if removed && wire.active.remove(topic) && wire.connected {
            if let Err(e) = send(&self.connection, topic, topic.kind().unsubscribe_method()) {
                tracing::debug!(hub = %self.kind, topic = %topic, error = %e, "Unsubscribe not sent");
            }
        }
        drop(wire);

        if removed {
            metrics::set_desired_topics(self.kind, self.registry.stats().topics);
            tracing::debug!(hub = %self.kind, topic = %topic, "Unsubscribed");
        }
        removed
    }

    /// Remove the callback identified by `handle`.
    pub fn unsubscribe_handle(&self, handle: &SubscriptionHandle) -> bool {
        self.unsubscribe(handle.topic(), Some(handle))
    }

    /// Open the connection in the background if nothing has opened it yet.
    fn activate(&self) {
        if self.connection.state() != ConnectionState::Disconnected {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(hub = %self.kind, "No runtime; connection opens on start()");
            return;
        };

        let connection = Arc::clone(&self.connection);
        let registry = Arc::clone(&self.registry);
        let hub = self.kind;
        runtime.spawn(async move {
            if registry.is_empty() {
                tracing::debug!(hub = %hub, "Subscriptions cleared before lazy connect");
                return;
            }
            if let Err(e) = connection.connect().await {
                tracing::warn!(hub = %hub, error = %e, "Lazy hub connect failed; retrying in background");
            }
        });
    }
}

fn send(connection: &HubConnection, topic: &Topic, method: &'static str) -> Result<(), RealtimeError> {
    connection.invoke(method, &[topic.invoke_argument()])?;
    metrics::record_invoke_sent(connection.hub(), method);
    Ok(())
}

/// Bring the Active set in line with a state transition.
fn resync(
    hub: HubKind,
    connection: &Weak<HubConnection>,
    registry: &SubscriptionRegistry,
    wire: &Mutex<WireState>,
    next: ConnectionState,
) {
    let mut wire = wire.lock();
    wire.active.clear();

    if next != ConnectionState::Connected {
        wire.connected = false;
        return;
    }
    wire.connected = true;

    let Some(connection) = connection.upgrade() else {
        return;
    };

    let desired = registry.all_topics();
    for topic in &desired {
        match send(&connection, topic, topic.kind().subscribe_method()) {
            Ok(()) => {
                wire.active.insert(topic.clone());
            }
            Err(e) => {
                tracing::warn!(hub = %hub, topic = %topic, error = %e, "Resubscribe failed");
            }
        }
    }
    tracing::info!(hub = %hub, topics = wire.active.len(), "Resubscribed desired topics");
}

/// Split inbound arguments into `(key, payload)`.
///
/// `[key, payload, ..]` is the usual shape. A lone object carries its own key
/// in the field named by the topic kind.
fn split_arguments(kind: TopicKind, arguments: &[Value]) -> Option<(String, &Value)> {
    match arguments {
        [] => None,
        [first, rest @ ..] => {
            if let Some(key) = key_from_value(first) {
                return Some((key, rest.first().unwrap_or(&NO_PAYLOAD)));
            }
            if rest.is_empty() && first.is_object() {
                let key = first.get(kind.key_field()).and_then(key_from_value)?;
                return Some((key, first));
            }
            None
        }
    }
}

/// Deliver one inbound event to the callbacks of its topic.
///
/// Callback errors and panics are reported to the sink and never stop
/// delivery to the remaining callbacks.
fn route_event(
    hub: HubKind,
    kind: TopicKind,
    registry: &SubscriptionRegistry,
    error_sink: &dyn ErrorSink,
    arguments: &[Value],
) {
    let event = kind.event_name();
    metrics::record_event_received(hub, event);

    let Some((key, payload)) = split_arguments(kind, arguments) else {
        tracing::trace!(hub = %hub, event, "Dropping event without a topic key");
        metrics::record_event_unmatched(hub, event);
        return;
    };

    let callbacks = registry.callbacks_for(&Topic::new(kind, key.as_str()));
    if callbacks.is_empty() {
        tracing::trace!(hub = %hub, event, key = %key, "Dropping event for unknown topic");
        metrics::record_event_unmatched(hub, event);
        return;
    }

    for callback in callbacks {
        let message = match catch_unwind(AssertUnwindSafe(|| callback(&key, payload))) {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        metrics::record_callback_error(hub);
        error_sink.report(&RealtimeError::Callback {
            hub,
            event: event.to_string(),
            key: key.clone(),
            message,
        });
    }
}
