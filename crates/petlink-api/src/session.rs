//! STOMP session over a pluggable transport, with fixed-delay reconnect.
//!
//! One background task owns the transport connection. It performs the
//! `CONNECT` handshake (with the bearer token from a [`TokenStore`]), drives
//! heart-beats, dispatches `MESSAGE` frames to subscription handlers, and on
//! any transport or protocol failure schedules a single reconnect attempt
//! after [`ReconnectConfig::delay`].
//!
//! Handler registration is synchronous: [`StompSession::subscribe`] and
//! [`SubscriptionHandle::unsubscribe`] update the handler registry under a
//! lock before returning. `unsubscribe` also waits out a delivery already
//! running on the session task, so once it returns the handler sees no
//! further frames. Handlers run on the session task, one frame at a time, in
//! arrival order. They are dropped when the connection is lost; the owner
//! re-subscribes on the next [`SessionEvent::Connected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use petlink_api::{MemoryTokenStore, SessionConfig, StompSession};
//! use petlink_api::transport::WsConnector;
//!
//! let session = StompSession::new(WsConnector::default(), ws_url, SessionConfig::default(), tokens);
//! let mut events = session.events();
//! session.connect();
//!
//! // after SessionEvent::Connected:
//! let handle = session.subscribe("/topic/device/D1/presence", |msg| {
//!     println!("{}", msg.body);
//! })?;
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::credentials::TokenStore;
use crate::error::Error;
use crate::stomp::{ACCEPT_VERSION, Frame, FrameDecoder, HeartBeat, Incoming, StompCommand};
use crate::transport::{ConnectRequest, Connection, Connector};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ── Configuration ────────────────────────────────────────────────────

/// Fixed-delay reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before each reconnection attempt. Default: 3s.
    pub delay: Duration,

    /// Consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(3000),
            max_retries: None,
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect: ReconnectConfig,
    /// Heart-beat intervals we propose. Default: 10s both ways.
    pub heartbeat: HeartBeat,
    /// Deadline for transport open and for the `CONNECTED` reply.
    pub connect_timeout: Duration,
    /// Optional `host` header for the `CONNECT` frame.
    pub host: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartBeat {
                outgoing: Duration::from_secs(10),
                incoming: Duration::from_secs(10),
            },
            connect_timeout: Duration::from_secs(10),
            host: None,
        }
    }
}

// ── Observable state ─────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32 },
    /// `max_retries` exhausted; call `connect()` to start over.
    Failed,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed. `epoch` increases with every connection.
    Connected { epoch: u64 },
    Disconnected { reason: String },
}

// ── Messages & handlers ──────────────────────────────────────────────

/// An inbound `MESSAGE` frame routed to a subscription.
#[derive(Debug, Clone)]
pub struct StompMessage {
    pub subscription: String,
    pub destination: String,
    pub message_id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompMessage {
    /// Decode the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: self.body.clone(),
        })
    }

    fn from_frame(frame: Frame) -> Option<Self> {
        let subscription = frame.get("subscription")?.to_owned();
        let destination = frame.get("destination").unwrap_or_default().to_owned();
        let message_id = frame.get("message-id").map(str::to_owned);
        Some(Self {
            subscription,
            destination,
            message_id,
            headers: frame.headers,
            body: frame.body,
        })
    }
}

type Handler = Arc<dyn Fn(&StompMessage) + Send + Sync>;

/// Open while the subscription is live. Held for the duration of each
/// handler call, so closing it waits out an in-flight delivery.
type Gate = Arc<Mutex<bool>>;

thread_local! {
    /// Gate of the handler currently running on this thread.
    static DELIVERING: RefCell<Option<Gate>> = const { RefCell::new(None) };
}

#[derive(Clone)]
struct Route {
    destination: String,
    handler: Handler,
    gate: Gate,
}

impl Route {
    fn deliver(&self, message: &StompMessage) {
        let open = lock(&self.gate);
        if !*open {
            return;
        }
        DELIVERING.with(|d| *d.borrow_mut() = Some(Arc::clone(&self.gate)));
        (self.handler)(message);
        DELIVERING.with(|d| *d.borrow_mut() = None);
        drop(open);
    }

    /// Stop delivery. Returns once no call to the handler is in progress,
    /// unless called from inside that handler.
    fn close(&self) {
        let reentrant =
            DELIVERING.with(|d| d.borrow().as_ref().is_some_and(|g| Arc::ptr_eq(g, &self.gate)));
        if !reentrant {
            *lock(&self.gate) = false;
        }
    }
}

/// Close every gate in `routes`. Call without the registry lock held.
fn close_all(routes: HashMap<String, Route>) {
    for route in routes.into_values() {
        route.close();
    }
}

/// Work for the session task, tagged with the connection it was issued on.
#[derive(Debug)]
enum Outbound {
    Subscribe {
        epoch: u64,
        id: String,
        destination: String,
    },
    Unsubscribe {
        epoch: u64,
        id: String,
    },
    Send {
        epoch: u64,
        destination: String,
        body: String,
        content_type: Option<String>,
    },
}

/// Handler registry plus the connection facts it must agree with.
#[derive(Default)]
struct Registry {
    /// Identifies the current `connect()` run; stale tasks are ignored.
    run: u64,
    epoch: u64,
    connected: bool,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    routes: HashMap<String, Route>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SubscriptionHandle ───────────────────────────────────────────────

/// Ownership of a live subscription; dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: String,
    destination: String,
    epoch: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Connection epoch this subscription was made on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Still registered with the session (not unsubscribed, connection alive).
    pub fn is_active(&self) -> bool {
        if !self.active {
            return false;
        }
        self.registry.upgrade().is_some_and(|registry| {
            let reg = lock(&registry);
            reg.epoch == self.epoch && reg.routes.contains_key(&self.id)
        })
    }

    /// Stop delivery and tell the broker. Idempotent.
    ///
    /// Waits for a delivery already in progress on another thread, so the
    /// caller must not hold a lock the handler takes.
    pub fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let route = {
            let mut reg = lock(&registry);
            if reg.epoch != self.epoch {
                return;
            }
            let Some(route) = reg.routes.remove(&self.id) else {
                return;
            };
            tracing::debug!(id = %self.id, destination = %self.destination, "unsubscribing");
            if reg.connected {
                if let Some(ref outbound) = reg.outbound {
                    let _ = outbound.send(Outbound::Unsubscribe {
                        epoch: self.epoch,
                        id: self.id.clone(),
                    });
                }
            }
            route
        };
        route.close();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("epoch", &self.epoch)
            .field("active", &self.active)
            .finish()
    }
}

// ── StompSession ─────────────────────────────────────────────────────

/// Handle to a STOMP session. Cheaply cloneable.
pub struct StompSession<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for StompSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: Connector> {
    connector: C,
    url: Url,
    config: SessionConfig,
    tokens: Arc<dyn TokenStore>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    registry: Arc<Mutex<Registry>>,
    running: Mutex<Option<Running>>,
    next_subscription: AtomicU64,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<C: Connector> StompSession<C> {
    /// Create a session. Does NOT connect; call [`connect()`](Self::connect).
    pub fn new(connector: C, url: Url, config: SessionConfig, tokens: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                url,
                config,
                tokens,
                state,
                events,
                registry: Arc::new(Mutex::new(Registry::default())),
                running: Mutex::new(None),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Start connecting in the background. No-op while already connecting,
    /// connected, or waiting to reconnect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut running = lock(&self.inner.running);
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            tracing::debug!("session already running");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (run, dropped) = {
            let mut reg = lock(&self.inner.registry);
            reg.run += 1;
            reg.connected = false;
            reg.outbound = Some(outbound_tx);
            (reg.run, std::mem::take(&mut reg.routes))
        };
        close_all(dropped);

        let cancel = CancellationToken::new();
        self.inner.state.send_replace(SessionState::Connecting);

        let inner = Arc::clone(&self.inner);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            session_loop(inner, run, outbound_rx, task_cancel).await;
        });

        *running = Some(Running { cancel, task });
    }

    /// Cancel any scheduled reconnect, close the transport, and drop every
    /// handler. Takes effect immediately; the background task winds down on
    /// its own (sending `DISCONNECT` if a connection is up).
    pub fn disconnect(&self) {
        if let Some(running) = lock(&self.inner.running).take() {
            running.cancel.cancel();
        }

        let (was_connected, dropped) = {
            let mut reg = lock(&self.inner.registry);
            let was = reg.connected;
            reg.run += 1;
            reg.connected = false;
            reg.outbound = None;
            (was, std::mem::take(&mut reg.routes))
        };
        close_all(dropped);

        self.inner.state.send_replace(SessionState::Disconnected);
        if was_connected {
            let _ = self.inner.events.send(SessionEvent::Disconnected {
                reason: "client disconnect".into(),
            });
        }
        tracing::debug!("session disconnected by client");
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register `handler` for frames on `destination`.
    ///
    /// Fails with [`Error::NotConnected`] unless the handshake has completed.
    pub fn subscribe<F>(
        &self,
        destination: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionHandle, Error>
    where
        F: Fn(&StompMessage) + Send + Sync + 'static,
    {
        let destination = destination.into();
        let mut reg = lock(&self.inner.registry);
        if !reg.connected {
            return Err(Error::NotConnected);
        }
        let outbound = reg.outbound.clone().ok_or(Error::NotConnected)?;

        let id = format!(
            "sub-{}",
            self.inner.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let epoch = reg.epoch;

        outbound
            .send(Outbound::Subscribe {
                epoch,
                id: id.clone(),
                destination: destination.clone(),
            })
            .map_err(|_| Error::NotConnected)?;
        reg.routes.insert(
            id.clone(),
            Route {
                destination: destination.clone(),
                handler: Arc::new(handler),
                gate: Arc::new(Mutex::new(true)),
            },
        );

        tracing::debug!(id = %id, destination = %destination, epoch, "subscribed");

        Ok(SubscriptionHandle {
            id,
            destination,
            epoch,
            registry: Arc::downgrade(&self.inner.registry),
            active: true,
        })
    }

    /// Equivalent to [`SubscriptionHandle::unsubscribe`].
    pub fn unsubscribe(&self, handle: &mut SubscriptionHandle) {
        handle.unsubscribe();
    }

    /// Publish `body` to `destination` with a STOMP `SEND` frame.
    pub fn send(
        &self,
        destination: impl Into<String>,
        body: impl Into<String>,
        content_type: Option<&str>,
    ) -> Result<(), Error> {
        let reg = lock(&self.inner.registry);
        if !reg.connected {
            return Err(Error::NotConnected);
        }
        let outbound = reg.outbound.as_ref().ok_or(Error::NotConnected)?;
        outbound
            .send(Outbound::Send {
                epoch: reg.epoch,
                destination: destination.into(),
                body: body.into(),
                content_type: content_type.map(str::to_owned),
            })
            .map_err(|_| Error::NotConnected)
    }

    // ── State observation ────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.registry).connected
    }

    /// Epoch of the current (or last) connection.
    pub fn epoch(&self) -> u64 {
        lock(&self.inner.registry).epoch
    }

    /// Number of handlers currently registered.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner.registry).routes.len()
    }

    pub fn reconnect_pending(&self) -> bool {
        matches!(*self.inner.state.borrow(), SessionState::Reconnecting { .. })
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to connect/disconnect notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }
}

// ── Registry transitions driven by the task ──────────────────────────

impl<C: Connector> Inner<C> {
    /// Publish a state if `run` is still the current one.
    fn set_state(&self, run: u64, state: SessionState) {
        let reg = lock(&self.registry);
        if reg.run == run {
            self.state.send_replace(state);
        }
    }

    /// Flip to connected and open a new epoch. `None` if this run was
    /// superseded by `disconnect()` or a newer `connect()`.
    fn mark_connected(&self, run: u64) -> Option<u64> {
        let mut reg = lock(&self.registry);
        if reg.run != run || reg.outbound.is_none() {
            return None;
        }
        reg.epoch += 1;
        reg.connected = true;
        let epoch = reg.epoch;
        self.state.send_replace(SessionState::Connected);
        let _ = self.events.send(SessionEvent::Connected { epoch });
        Some(epoch)
    }

    fn mark_disconnected(&self, run: u64, reason: String) {
        let mut reg = lock(&self.registry);
        if reg.run != run {
            return;
        }
        let was_connected = reg.connected;
        reg.connected = false;
        let dropped = std::mem::take(&mut reg.routes);
        self.state.send_replace(SessionState::Disconnected);
        if was_connected {
            let _ = self.events.send(SessionEvent::Disconnected { reason });
        }
        drop(reg);
        close_all(dropped);
    }

    /// Translate queued work into a frame, skipping anything issued on an
    /// older connection or already withdrawn.
    fn outbound_frame(&self, cmd: Outbound, current_epoch: u64) -> Option<Frame> {
        match cmd {
            Outbound::Subscribe {
                epoch,
                id,
                destination,
            } => {
                let reg = lock(&self.registry);
                (epoch == current_epoch && reg.routes.contains_key(&id)).then(|| {
                    Frame::new(StompCommand::Subscribe)
                        .header("id", id)
                        .header("destination", destination)
                })
            }
            Outbound::Unsubscribe { epoch, id } => (epoch == current_epoch)
                .then(|| Frame::new(StompCommand::Unsubscribe).header("id", id)),
            Outbound::Send {
                epoch,
                destination,
                body,
                content_type,
            } => (epoch == current_epoch).then(|| {
                let mut frame = Frame::new(StompCommand::Send).header("destination", destination);
                if let Some(ct) = content_type {
                    frame = frame.header("content-type", ct);
                }
                frame.body(body)
            }),
        }
    }

    /// Route one inbound frame. Errors end the connection.
    fn dispatch(&self, frame: Frame) -> Result<(), Error> {
        match frame.command {
            StompCommand::Message => {
                let Some(message) = StompMessage::from_frame(frame) else {
                    return Err(Error::Protocol("MESSAGE without subscription header".into()));
                };
                let route = lock(&self.registry).routes.get(&message.subscription).cloned();
                match route {
                    Some(route) => {
                        tracing::trace!(
                            subscription = %message.subscription,
                            destination = %route.destination,
                            "dispatching message"
                        );
                        route.deliver(&message);
                    }
                    None => tracing::debug!(
                        subscription = %message.subscription,
                        "dropping message for unknown subscription"
                    ),
                }
                Ok(())
            }
            StompCommand::Receipt => {
                tracing::debug!(receipt = ?frame.get("receipt-id"), "receipt");
                Ok(())
            }
            StompCommand::Error => Err(Error::Broker {
                message: frame.get("message").unwrap_or("unspecified").to_owned(),
                body: frame.body,
            }),
            StompCommand::Connected => {
                tracing::warn!("ignoring repeated CONNECTED frame");
                Ok(())
            }
            other => Err(Error::Protocol(format!("unexpected {other} frame from broker"))),
        }
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(StompCommand::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", self.config.heartbeat.header_value());
        if let Some(ref host) = self.config.host {
            frame = frame.header("host", host.clone());
        }
        match self.tokens.token() {
            Some(token) => {
                frame = frame.header("Authorization", format!("Bearer {}", token.expose_secret()));
            }
            None => tracing::debug!("no token stored, connecting without Authorization"),
        }
        frame
    }
}

// ── Background loop ──────────────────────────────────────────────────

/// How a single connection ended without error.
enum Exit {
    /// `disconnect()` was called.
    Shutdown,
    /// The peer closed the transport.
    Closed,
}

/// Outcome of one connection attempt.
struct Attempt {
    result: Result<Exit, Error>,
    handshake_completed: bool,
}

/// connect → read → on failure, wait the fixed delay → reconnect.
async fn session_loop<C: Connector>(
    inner: Arc<Inner<C>>,
    run: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let attempt = run_connection(&inner, run, &mut outbound, &cancel).await;
        if attempt.handshake_completed {
            failures = 0;
        }

        let reason = match attempt.result {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Closed) => {
                tracing::info!("STOMP connection closed by peer");
                "closed by peer".to_owned()
            }
            Err(e) => {
                tracing::warn!(error = %e, failures, "STOMP session error");
                e.to_string()
            }
        };
        inner.mark_disconnected(run, reason);
        if cancel.is_cancelled() {
            break;
        }

        failures += 1;
        if let Some(max) = inner.config.reconnect.max_retries {
            if failures > max {
                tracing::error!(max_retries = max, "reconnection limit reached, giving up");
                inner.set_state(run, SessionState::Failed);
                break;
            }
        }

        let delay = inner.config.reconnect.delay;
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = failures,
            "Waiting before reconnect"
        );
        inner.set_state(run, SessionState::Reconnecting { attempt: failures });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        inner.set_state(run, SessionState::Connecting);
    }

    tracing::debug!("session loop exiting");
}

/// Open one transport connection, handshake, and serve it until it ends.
async fn run_connection<C: Connector>(
    inner: &Inner<C>,
    run: u64,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
) -> Attempt {
    let mut handshake_completed = false;
    let result = serve(inner, run, outbound, cancel, &mut handshake_completed).await;
    Attempt {
        result,
        handshake_completed,
    }
}

async fn serve<C: Connector>(
    inner: &Inner<C>,
    run: u64,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
    handshake_completed: &mut bool,
) -> Result<Exit, Error> {
    let connect_timeout = inner.config.connect_timeout;
    let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);
    let request = ConnectRequest::new(inner.url.clone());

    let mut conn = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Exit::Shutdown),
        opened = tokio::time::timeout(connect_timeout, inner.connector.open(&request)) => {
            opened.map_err(|_| Error::Timeout { operation: "transport open", timeout_ms })??
        }
    };

    // Every exit past this point closes the transport.
    let result = serve_open(inner, run, &mut conn, outbound, cancel, handshake_completed).await;
    conn.close().await;
    result
}

/// Handshake and pump an opened connection. The caller closes it.
async fn serve_open<C: Connector>(
    inner: &Inner<C>,
    run: u64,
    conn: &mut C::Connection,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
    handshake_completed: &mut bool,
) -> Result<Exit, Error> {
    let connect_timeout = inner.config.connect_timeout;
    let timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX);

    conn.send(inner.connect_frame().encode()).await?;

    let mut decoder = FrameDecoder::default();
    let (connected, backlog) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(Exit::Shutdown),
        reply = tokio::time::timeout(connect_timeout, await_connected(conn, &mut decoder)) => {
            reply.map_err(|_| Error::Timeout { operation: "STOMP handshake", timeout_ms })??
        }
    };

    let server_heartbeat = connected
        .get("heart-beat")
        .map(HeartBeat::parse)
        .transpose()?
        .unwrap_or_default();
    let heartbeat = HeartBeat::negotiate(inner.config.heartbeat, server_heartbeat);

    let Some(epoch) = inner.mark_connected(run) else {
        return Ok(Exit::Shutdown);
    };
    *handshake_completed = true;
    tracing::info!(
        epoch,
        version = connected.get("version").unwrap_or("1.0"),
        heartbeat_out_ms = u64::try_from(heartbeat.outgoing.as_millis()).unwrap_or(u64::MAX),
        heartbeat_in_ms = u64::try_from(heartbeat.incoming.as_millis()).unwrap_or(u64::MAX),
        "STOMP session connected"
    );

    // Frames that arrived in the same transport message as CONNECTED.
    for item in backlog {
        if let Incoming::Frame(frame) = item {
            inner.dispatch(frame)?;
        }
    }

    let result = pump(inner, conn, &mut decoder, outbound, cancel, epoch, heartbeat).await;
    if matches!(result, Ok(Exit::Shutdown)) {
        let _ = conn
            .send(Frame::new(StompCommand::Disconnect).encode())
            .await;
    }
    result
}

/// Read until the broker answers the `CONNECT` frame.
///
/// Returns the `CONNECTED` frame and anything decoded after it.
async fn await_connected<T: Connection>(
    conn: &mut T,
    decoder: &mut FrameDecoder,
) -> Result<(Frame, Vec<Incoming>), Error> {
    loop {
        let text = match conn.recv().await {
            Some(text) => text?,
            None => return Err(Error::Protocol("connection closed during handshake".into())),
        };

        let mut items = decoder.push(&text)?.into_iter();
        while let Some(item) = items.next() {
            match item {
                Incoming::Heartbeat => {}
                Incoming::Frame(frame) => match frame.command {
                    StompCommand::Connected => return Ok((frame, items.collect())),
                    StompCommand::Error => {
                        return Err(Error::Broker {
                            message: frame.get("message").unwrap_or("unspecified").to_owned(),
                            body: frame.body,
                        });
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "expected CONNECTED, got {other}"
                        )));
                    }
                },
            }
        }
    }
}

/// Serve an established connection.
async fn pump<C: Connector>(
    inner: &Inner<C>,
    conn: &mut C::Connection,
    decoder: &mut FrameDecoder,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    cancel: &CancellationToken,
    epoch: u64,
    heartbeat: HeartBeat,
) -> Result<Exit, Error> {
    let mut ping = heartbeat_interval(heartbeat.outgoing);
    // Allow twice the promised interval before declaring the peer dead.
    let grace = heartbeat.incoming * 2;
    let mut last_seen = Instant::now();

    loop {
        let deadline = (!grace.is_zero()).then(|| last_seen + grace);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(Exit::Shutdown),
            Some(cmd) = outbound.recv() => {
                if let Some(frame) = inner.outbound_frame(cmd, epoch) {
                    tracing::trace!(command = %frame.command, "sending frame");
                    conn.send(frame.encode()).await?;
                }
            }
            incoming = conn.recv() => {
                let text = match incoming {
                    None => return Ok(Exit::Closed),
                    Some(text) => text?,
                };
                last_seen = Instant::now();
                for item in decoder.push(&text)? {
                    match item {
                        Incoming::Heartbeat => tracing::trace!("heart-beat received"),
                        Incoming::Frame(frame) => inner.dispatch(frame)?,
                    }
                }
            }
            () = tick(ping.as_mut()) => {
                conn.send("\n".to_owned()).await?;
            }
            () = expire(deadline) => {
                return Err(Error::Timeout {
                    operation: "heart-beat",
                    timeout_ms: u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }
}

fn heartbeat_interval(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect.delay, Duration::from_millis(3000));
        assert!(config.reconnect.max_retries.is_none());
        assert_eq!(config.heartbeat.header_value(), "10000,10000");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn message_json_decode_error_keeps_body() {
        let message = StompMessage {
            subscription: "sub-0".into(),
            destination: "/topic/x".into(),
            message_id: None,
            headers: Vec::new(),
            body: "{oops".into(),
        };

        let err = message.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, Error::Deserialization { ref body, .. } if body == "{oops"));
    }

    #[test]
    fn message_from_frame_requires_subscription() {
        let frame = Frame::new(StompCommand::Message).header("destination", "/topic/x");
        assert!(StompMessage::from_frame(frame).is_none());

        let frame = Frame::new(StompCommand::Message)
            .header("destination", "/topic/x")
            .header("subscription", "sub-3")
            .header("message-id", "m-1")
            .body("{}");
        let message = StompMessage::from_frame(frame).unwrap();
        assert_eq!(message.subscription, "sub-3");
        assert_eq!(message.destination, "/topic/x");
        assert_eq!(message.message_id.as_deref(), Some("m-1"));
    }
}
