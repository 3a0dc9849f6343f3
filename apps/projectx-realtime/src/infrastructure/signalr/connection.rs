//! Hub Transport Connection
//!
//! One persistent SignalR connection to one hub. The connection owns:
//!
//! - a supervisor task that connects, pumps frames and reconnects with
//!   backoff until cancelled
//! - a dispatch task that runs event handlers in arrival order, off the
//!   read loop
//! - the connection state, published through a `watch` channel
//!
//! # Lifecycle
//!
//! ```text
//! connect() ─► spawn supervisor ─► establish ─► Connected ─► pump frames
//!                                    │  ▲                       │
//!                                 failed │                  lost │
//!                                    ▼  │                       ▼
//!                               Reconnecting ◄── backoff ◄──────┘
//! ```
//!
//! The first connect attempt reports its outcome to the `connect()` caller.
//! Every later failure is retried transparently. `disconnect()` cancels the
//! supervisor (including a pending backoff wait) and waits for it to exit.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::application::error::RealtimeError;
use crate::application::ports::{CredentialSupplier, StatusHook};
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::topic::HubKind;
use crate::infrastructure::config::RealtimeConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::signalr::codec::{HubMessage, SignalRCodec};
use crate::infrastructure::signalr::endpoint::hub_endpoint;
use crate::infrastructure::signalr::reconnect::{ReconnectConfig, ReconnectPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handler for a named inbound event; receives the positional arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Internal observer of state transitions: `(previous, next)`.
pub type StateListener = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<String, Vec<EventHandler>>>>;

// =============================================================================
// Settings
// =============================================================================

/// Timing settings of a hub connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Backoff between reconnect attempts.
    pub reconnect: ReconnectConfig,
    /// Interval between client keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Silence from the server after which the connection is considered lost.
    pub server_timeout: Duration,
    /// Timeout for the WebSocket upgrade plus hub handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_realtime_config(&RealtimeConfig::default())
    }
}

impl ConnectionSettings {
    /// Take the connection timings from a realtime configuration.
    #[must_use]
    pub fn from_realtime_config(config: &RealtimeConfig) -> Self {
        Self {
            reconnect: ReconnectConfig::from_realtime_config(config),
            keep_alive_interval: config.keep_alive_interval,
            server_timeout: config.server_timeout,
            connect_timeout: config.connect_timeout,
        }
    }
}

// =============================================================================
// Hub Connection
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Progress {
    state: ConnectionState,
    /// Connect attempts finished so far (successful or not).
    attempts: u64,
}

struct Supervisor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct InboundEvent {
    target: String,
    arguments: Vec<Value>,
}

/// A persistent, self-healing connection to one hub.
pub struct HubConnection {
    hub: HubKind,
    url: String,
    credentials: Arc<dyn CredentialSupplier>,
    settings: ConnectionSettings,
    codec: SignalRCodec,
    progress: watch::Sender<Progress>,
    handlers: HandlerMap,
    listeners: RwLock<Vec<StateListener>>,
    status_hooks: RwLock<Vec<StatusHook>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
    shutdown: CancellationToken,
    last_error: Mutex<Option<RealtimeError>>,
    transition: Mutex<()>,
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("hub", &self.hub)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl HubConnection {
    /// Create a disconnected hub connection.
    #[must_use]
    pub fn new(
        hub: HubKind,
        url: impl Into<String>,
        credentials: Arc<dyn CredentialSupplier>,
        settings: ConnectionSettings,
    ) -> Self {
        let (progress, _) = watch::channel(Progress {
            state: ConnectionState::Disconnected,
            attempts: 0,
        });

        Self {
            hub,
            url: url.into(),
            credentials,
            settings,
            codec: SignalRCodec::new(),
            progress,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            listeners: RwLock::new(Vec::new()),
            status_hooks: RwLock::new(Vec::new()),
            outbound: RwLock::new(None),
            supervisor: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            last_error: Mutex::new(None),
            transition: Mutex::new(()),
        }
    }

    /// Get the hub this connection serves.
    #[must_use]
    pub const fn hub(&self) -> HubKind {
        self.hub
    }

    /// Get the configured hub URL (without credentials).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.progress.borrow().state
    }

    /// Get the most recent connect or transport failure.
    #[must_use]
    pub fn last_error(&self) -> Option<RealtimeError> {
        self.last_error.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register a handler for a named inbound event.
    ///
    /// Handlers for the same event run in registration order.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Register an internal state-transition listener.
    ///
    /// Listeners run synchronously on the transitioning task, before the
    /// state is reported to status hooks. Entering `Connected` notifies
    /// listeners before any inbound frame is read.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Register an observability hook for state transitions.
    pub fn on_status(&self, hook: StatusHook) {
        self.status_hooks.write().push(hook);
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect, waiting until `Connected` or the current attempt fails.
    ///
    /// Returns immediately if already connected. A call made while an attempt
    /// is in flight waits for that attempt instead of starting another. When
    /// an attempt fails the error is returned and the connection keeps
    /// retrying in the background until `disconnect()`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), RealtimeError> {
        let mut progress_rx = self.progress.subscribe();
        let attempts_before = {
            let mut supervisor = self.supervisor.lock().await;
            let progress = *self.progress.borrow();

            match progress.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(RealtimeError::Closed { hub: self.hub }),
                _ => {}
            }

            let running = supervisor
                .as_ref()
                .is_some_and(|running| !running.task.is_finished());
            if !running {
                let cancel = self.shutdown.child_token();
                self.set_state(ConnectionState::Connecting, 0);
                let task = tokio::spawn(Arc::clone(self).supervise(cancel.clone()));
                *supervisor = Some(Supervisor { cancel, task });
            }
            progress.attempts
        };

        let settled = progress_rx
            .wait_for(|progress| {
                matches!(
                    progress.state,
                    ConnectionState::Connected
                        | ConnectionState::Disconnected
                        | ConnectionState::Closed
                ) || progress.attempts > attempts_before
            })
            .await
            .map(|progress| progress.state)
            .unwrap_or(ConnectionState::Closed);

        match settled {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Closed => Err(RealtimeError::Closed { hub: self.hub }),
            _ => Err(self.last_error().unwrap_or_else(|| {
                RealtimeError::connection(self.hub, "connect attempt aborted")
            })),
        }
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Safe from any state; a pending backoff wait is cancelled.
    pub async fn disconnect(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(running) = supervisor.take() {
            running.cancel.cancel();
            if let Err(e) = running.task.await
                && e.is_panic()
            {
                tracing::error!(hub = %self.hub, "Hub supervisor panicked");
            }
        }
        *self.outbound.write() = None;
        self.set_state(ConnectionState::Disconnected, 0);
    }

    /// Permanently shut the connection down without waiting.
    ///
    /// The connection moves to the terminal `Closed` state; later `connect()`
    /// calls fail with `RealtimeError::Closed`.
    pub fn close(&self) {
        self.shutdown.cancel();
        *self.outbound.write() = None;
        self.set_state(ConnectionState::Closed, 0);
    }

    /// Wait until the connection reaches `target` (or becomes `Closed`).
    pub async fn wait_for_state(&self, target: ConnectionState) -> ConnectionState {
        let mut progress_rx = self.progress.subscribe();
        progress_rx
            .wait_for(|progress| progress.state == target || progress.state.is_terminal())
            .await
            .map_or(ConnectionState::Closed, |progress| progress.state)
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Send a fire-and-forget invocation.
    ///
    /// Fails with `NotConnected` unless the connection is `Connected`.
    pub fn invoke(&self, target: &str, arguments: &[Value]) -> Result<(), RealtimeError> {
        if self.state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected { hub: self.hub });
        }

        let frame = self
            .codec
            .encode_invocation(target, arguments)
            .map_err(|e| RealtimeError::connection(self.hub, e))?;

        let outbound = self.outbound.read();
        let sender = outbound
            .as_ref()
            .ok_or(RealtimeError::NotConnected { hub: self.hub })?;
        sender
            .send(frame)
            .map_err(|_| RealtimeError::NotConnected { hub: self.hub })?;

        tracing::debug!(hub = %self.hub, target, "Invoke queued");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Move to `next`, notifying listeners and hooks. Returns false when the
    /// state was already `next` or the connection is closed.
    fn set_state(&self, next: ConnectionState, attempt: u32) -> bool {
        let previous = {
            let _transition = self.transition.lock();
            let mut previous = None;
            self.progress.send_if_modified(|progress| {
                if progress.state == next || progress.state.is_terminal() {
                    return false;
                }
                previous = Some(progress.state);
                progress.state = next;
                true
            });
            let Some(previous) = previous else {
                return false;
            };

            let listeners = self.listeners.read().clone();
            for listener in listeners {
                listener(previous, next);
            }
            previous
        };

        metrics::set_connected(self.hub, next == ConnectionState::Connected);
        tracing::info!(
            hub = %self.hub,
            from = %previous,
            to = %next,
            attempt,
            "Hub connection state changed"
        );
        self.emit_status(next, attempt);
        true
    }

    fn emit_status(&self, state: ConnectionState, attempt: u32) {
        let hooks = self.status_hooks.read().clone();
        if hooks.is_empty() {
            return;
        }
        let status = ConnectionStatus::now(self.hub, state, attempt);
        for hook in hooks {
            hook(&status);
        }
    }

    fn finish_attempt(&self, error: Option<RealtimeError>) {
        if let Some(error) = error {
            *self.last_error.lock() = Some(error);
        }
        self.progress.send_modify(|progress| progress.attempts += 1);
    }

    // -------------------------------------------------------------------------
    // Supervisor
    // -------------------------------------------------------------------------

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(self.hub, Arc::clone(&self.handlers), dispatch_rx));
        let mut has_connected = false;

        loop {
            let established = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok((stream, pending)) => {
                    let reconnected = has_connected || policy.attempt_count() > 0;
                    policy.reset();
                    has_connected = true;

                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    *self.outbound.write() = Some(outbound_tx);
                    self.set_state(ConnectionState::Connected, 0);
                    self.finish_attempt(None);
                    if reconnected {
                        tracing::info!(hub = %self.hub, "Hub reconnected");
                        metrics::record_reconnect(self.hub);
                    }

                    let outcome = self
                        .pump(stream, pending, outbound_rx, &cancel, &dispatch_tx)
                        .await;
                    *self.outbound.write() = None;

                    match outcome {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!(hub = %self.hub, error = %e, "Hub connection lost");
                            *self.last_error.lock() = Some(e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(hub = %self.hub, error = %e, "Hub connect attempt failed");
                    self.finish_attempt(Some(e));
                }
            }

            let Some(delay) = policy.next_delay() else {
                tracing::warn!(
                    hub = %self.hub,
                    attempts = policy.attempt_count(),
                    "Maximum reconnect attempts exceeded, giving up"
                );
                self.set_state(ConnectionState::Disconnected, policy.attempt_count());
                break;
            };

            let attempt = policy.attempt_count();
            if !self.set_state(ConnectionState::Reconnecting, attempt) {
                self.emit_status(ConnectionState::Reconnecting, attempt);
            }
            tracing::info!(
                hub = %self.hub,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to hub"
            );

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(hub = %self.hub, "Reconnect wait cancelled");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        drop(dispatch_tx);
        if let Err(e) = dispatcher.await
            && e.is_panic()
        {
            tracing::error!(hub = %self.hub, "Hub dispatcher panicked");
        }
    }

    /// Open the WebSocket and complete the hub handshake.
    ///
    /// Returns the stream and any records that followed the handshake
    /// response in the same frame.
    async fn establish(&self) -> Result<(WsStream, Vec<String>), RealtimeError> {
        let token = self.credentials.get_token().await?;
        let endpoint =
            hub_endpoint(&self.url, &token).map_err(|e| RealtimeError::connection(self.hub, e))?;
        tracing::info!(hub = %self.hub, url = %self.url, "Connecting to hub");

        let handshake = async {
            let (mut stream, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| RealtimeError::connection(self.hub, e))?;

            let request = self
                .codec
                .handshake_request()
                .map_err(|e| RealtimeError::connection(self.hub, e))?;
            stream
                .send(Message::text(request))
                .await
                .map_err(|e| RealtimeError::connection(self.hub, e))?;

            loop {
                let text = match stream.next().await {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8(data.to_vec())
                        .map_err(|e| RealtimeError::connection(self.hub, e))?,
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(RealtimeError::connection(
                            self.hub,
                            "connection closed during handshake",
                        ));
                    }
                    Some(Err(e)) => return Err(RealtimeError::connection(self.hub, e)),
                };

                let mut records = SignalRCodec::split_records(&text);
                let Some(response) = records.next() else {
                    continue;
                };
                if let Some(error) = self
                    .codec
                    .decode_handshake(response)
                    .map_err(|e| RealtimeError::connection(self.hub, e))?
                {
                    return Err(RealtimeError::connection(
                        self.hub,
                        format!("handshake rejected: {error}"),
                    ));
                }
                let pending: Vec<String> = records.map(str::to_owned).collect();
                return Ok((stream, pending));
            }
        };

        tokio::time::timeout(self.settings.connect_timeout, handshake)
            .await
            .map_err(|_| {
                RealtimeError::connection(
                    self.hub,
                    format!("handshake timed out after {:?}", self.settings.connect_timeout),
                )
            })?
    }

    /// Pump frames until cancelled (`Ok`) or the connection is lost (`Err`).
    async fn pump(
        &self,
        stream: WsStream,
        pending: Vec<String>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
        dispatch_tx: &mpsc::UnboundedSender<InboundEvent>,
    ) -> Result<(), RealtimeError> {
        let (mut write, mut read) = stream.split();
        let to_error = |e: tokio_tungstenite::tungstenite::Error| RealtimeError::connection(self.hub, e);

        for record in &pending {
            self.route_record(record, dispatch_tx)?;
        }

        let interval = self.settings.keep_alive_interval;
        let mut keep_alive = tokio::time::interval_at(Instant::now() + interval, interval);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::text(self.codec.encode_close())).await;
                    let _ = write.close().await;
                    return Ok(());
                }
                Some(frame) = outbound_rx.recv() => {
                    tracing::trace!(hub = %self.hub, frame = %frame, "Sending frame");
                    write.send(Message::text(frame)).await.map_err(to_error)?;
                }
                _ = keep_alive.tick() => {
                    write.send(Message::text(self.codec.encode_ping())).await.map_err(to_error)?;
                }
                () = tokio::time::sleep_until(last_seen + self.settings.server_timeout) => {
                    return Err(RealtimeError::connection(
                        self.hub,
                        format!("server silent for {:?}", self.settings.server_timeout),
                    ));
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.route_frame(text.as_str(), dispatch_tx)?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            last_seen = Instant::now();
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.route_frame(text, dispatch_tx)?,
                                Err(e) => {
                                    tracing::warn!(hub = %self.hub, error = %e, "Ignoring non-UTF-8 binary frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            write.send(Message::Pong(data)).await.map_err(to_error)?;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => {
                            last_seen = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(RealtimeError::connection(
                                self.hub,
                                format!("server closed the WebSocket: {frame:?}"),
                            ));
                        }
                        Some(Err(e)) => return Err(to_error(e)),
                        None => {
                            return Err(RealtimeError::connection(self.hub, "WebSocket stream ended"));
                        }
                    }
                }
            }
        }
    }

    fn route_frame(
        &self,
        text: &str,
        dispatch_tx: &mpsc::UnboundedSender<InboundEvent>,
    ) -> Result<(), RealtimeError> {
        for record in SignalRCodec::split_records(text) {
            self.route_record(record, dispatch_tx)?;
        }
        Ok(())
    }

    /// Route one record. Only a server `Close` record is an error.
    fn route_record(
        &self,
        record: &str,
        dispatch_tx: &mpsc::UnboundedSender<InboundEvent>,
    ) -> Result<(), RealtimeError> {
        let message = match self.codec.decode(record) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(hub = %self.hub, error = %e, "Ignoring undecodable record");
                return Ok(());
            }
        };

        match message {
            HubMessage::Invocation { target, arguments } => {
                tracing::trace!(hub = %self.hub, target = %target, "Inbound event");
                // The dispatcher only stops after the supervisor drops its sender.
                let _ = dispatch_tx.send(InboundEvent { target, arguments });
            }
            HubMessage::Ping => tracing::trace!(hub = %self.hub, "Server ping"),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let reason = error.unwrap_or_else(|| "no reason given".to_string());
                tracing::warn!(hub = %self.hub, reason = %reason, allow_reconnect, "Server closed the hub");
                return Err(RealtimeError::connection(
                    self.hub,
                    format!("server closed the hub: {reason}"),
                ));
            }
            HubMessage::Completion { error: Some(error) } => {
                tracing::debug!(hub = %self.hub, error = %error, "Invocation completed with error");
            }
            other => tracing::trace!(hub = %self.hub, message = ?other, "Ignoring record"),
        }
        Ok(())
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run handlers for inbound events in arrival order.
///
/// A panicking handler is logged and does not stop delivery.
async fn dispatch(
    hub: HubKind,
    handlers: HandlerMap,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
) {
    while let Some(event) = events.recv().await {
        let snapshot = handlers
            .read()
            .get(&event.target)
            .cloned()
            .unwrap_or_default();

        if snapshot.is_empty() {
            tracing::trace!(hub = %hub, target = %event.target, "No handler for event");
            continue;
        }

        for handler in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event.arguments))) {
                tracing::error!(
                    hub = %hub,
                    target = %event.target,
                    panic = panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }
}

/// Extract the message of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
