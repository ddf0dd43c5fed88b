// ── Device real-time channel ──
//
// Binds one device at a time to its command-status and presence topics on a
// shared STOMP session. Switching devices swaps the two subscriptions
// without touching the connection; the session's reconnects are followed by
// a rebind of the current device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use petlink_api::transport::{Connector, WsConnector};
use petlink_api::{
    SessionEvent, SessionState, StompMessage, StompSession, SubscriptionHandle, TokenStore,
};

use crate::config::ChannelConfig;
use crate::error::CoreError;
use crate::model::{CommandStatus, DeviceId, PresenceEvent};
use crate::stream::{Slot, SlotStream};

const ERROR_CHANNEL_SIZE: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Binding ──────────────────────────────────────────────────────

/// Which device is bound, and the live subscriptions for it.
#[derive(Default)]
struct Binding {
    current: Option<DeviceId>,
    /// Session epoch the `handles` were created on.
    bound_epoch: Option<u64>,
    handles: Vec<SubscriptionHandle>,
}

impl Binding {
    /// Drop every subscription; each handle unsubscribes on drop.
    fn release(&mut self) {
        self.handles.clear();
        self.bound_epoch = None;
    }
}

struct Shared {
    topic_prefix: String,
    binding: Mutex<Binding>,
    /// Bumped under the binding lock on every switch and disconnect;
    /// handlers from an older generation discard their frames.
    generation: AtomicU64,
    command_status: watch::Sender<Slot<CommandStatus>>,
    presence: watch::Sender<Slot<PresenceEvent>>,
    errors: broadcast::Sender<Arc<CoreError>>,
}

#[derive(Clone, Copy)]
enum TopicKind {
    CommandStatus,
    Presence,
}

impl Shared {
    fn clear_slots(&self) {
        self.command_status.send_replace(None);
        self.presence.send_replace(None);
    }

    /// Subscribe the current device's topics on the live connection.
    ///
    /// Leaves the binding pending when the session is not connected; the
    /// listener binds it on the next connect event.
    fn bind<C: Connector>(self: &Arc<Self>, binding: &mut Binding, session: &StompSession<C>) {
        let Some(device) = binding.current.clone() else {
            return;
        };
        binding.release();

        if !session.is_connected() {
            debug!(device = %device, "session not connected, binding deferred");
            return;
        }

        let topics = device.topics(&self.topic_prefix);
        let generation = self.generation.load(Ordering::SeqCst);
        let mut handles = Vec::with_capacity(2);

        for (destination, kind) in [
            (topics.command_status, TopicKind::CommandStatus),
            (topics.presence, TopicKind::Presence),
        ] {
            let shared = Arc::downgrade(self);
            let handler_device = device.clone();
            let handler = move |msg: &StompMessage| {
                deliver(&shared, generation, &handler_device, kind, msg);
            };
            match session.subscribe(destination, handler) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Connection dropped mid-bind; the next connect rebinds.
                    debug!(device = %device, error = %e, "bind interrupted");
                    return;
                }
            }
        }

        binding.bound_epoch = handles.first().map(SubscriptionHandle::epoch);
        binding.handles = handles;
        info!(device = %device, epoch = ?binding.bound_epoch, "device bound");
    }
}

/// Apply one inbound frame to its slot, if it still belongs to the binding.
fn deliver(
    shared: &Weak<Shared>,
    generation: u64,
    device: &DeviceId,
    kind: TopicKind,
    msg: &StompMessage,
) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let decoded = match kind {
        TopicKind::CommandStatus => msg
            .json::<CommandStatus>()
            .map(|s| (s.device_id.clone(), Decoded::CommandStatus(s))),
        TopicKind::Presence => msg
            .json::<PresenceEvent>()
            .map(|p| (p.device_id.clone(), Decoded::Presence(p))),
    };
    let (payload_device, decoded) = match decoded {
        Ok(ok) => ok,
        Err(e) => {
            warn!(destination = %msg.destination, error = %e, "dropping malformed frame");
            let _ = shared.errors.send(Arc::new(CoreError::Decode {
                destination: msg.destination.clone(),
                message: e.to_string(),
            }));
            return;
        }
    };

    // A switch bumps the generation, then unsubscribes (which waits for this
    // call to finish), then clears the slots.
    if shared.generation.load(Ordering::SeqCst) != generation {
        debug!(destination = %msg.destination, "dropping frame for stale binding");
        return;
    }
    if payload_device != device.as_str() {
        debug!(
            bound = %device,
            payload = %payload_device,
            "dropping frame for another device"
        );
        return;
    }

    match decoded {
        Decoded::CommandStatus(status) => {
            shared.command_status.send_replace(Some(Arc::new(status)));
        }
        Decoded::Presence(presence) => {
            shared.presence.send_replace(Some(Arc::new(presence)));
        }
    }
}

enum Decoded {
    CommandStatus(CommandStatus),
    Presence(PresenceEvent),
}

// ── DeviceChannel ────────────────────────────────────────────────

/// Per-device subscription manager over a [`StompSession`].
///
/// One channel per consumer view. `connect`, `subscribe_device` and
/// `disconnect` return immediately; outcomes show up in the state slots,
/// [`connection_state()`](Self::connection_state), and
/// [`errors()`](Self::errors).
pub struct DeviceChannel<C: Connector> {
    session: StompSession<C>,
    shared: Arc<Shared>,
    listener: Mutex<Option<Listener>>,
}

struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceChannel<WsConnector> {
    /// Channel over a WebSocket session built from `config`.
    pub fn from_config(config: &ChannelConfig, tokens: Arc<dyn TokenStore>) -> Self {
        let connector = WsConnector::new(config.ws_mode(), config.timeout);
        let session = StompSession::new(
            connector,
            config.ws_url.clone(),
            config.session_config(),
            tokens,
        );
        Self::new(session, config.topic_prefix.clone())
    }
}

impl<C: Connector> DeviceChannel<C> {
    pub fn new(session: StompSession<C>, topic_prefix: impl Into<String>) -> Self {
        let (command_status, _) = watch::channel(None);
        let (presence, _) = watch::channel(None);
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_SIZE);
        Self {
            session,
            shared: Arc::new(Shared {
                topic_prefix: topic_prefix.into(),
                binding: Mutex::new(Binding::default()),
                generation: AtomicU64::new(0),
                command_status,
                presence,
                errors,
            }),
            listener: Mutex::new(None),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the session. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        {
            let mut listener = lock(&self.listener);
            if listener.as_ref().is_none_or(|l| l.task.is_finished()) {
                let cancel = CancellationToken::new();
                let events = self.session.events();
                let task = tokio::spawn(listen(
                    self.session.clone(),
                    Arc::downgrade(&self.shared),
                    events,
                    cancel.clone(),
                ));
                *listener = Some(Listener { cancel, task });
            }
        }
        self.session.connect();
    }

    /// Bind `device`, replacing any current binding.
    ///
    /// Old subscriptions are removed and both slots cleared before the new
    /// subscriptions are made. When the session is not connected the binding
    /// takes effect on the next connect.
    pub fn subscribe_device(&self, device: DeviceId) {
        let mut binding = lock(&self.shared.binding);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        binding.release();
        self.shared.clear_slots();

        info!(device = %device, previous = ?binding.current, "switching device");
        binding.current = Some(device);
        self.shared.bind(&mut binding, &self.session);
    }

    /// Drop the binding, clear both slots, and close the session.
    pub fn disconnect(&self) {
        {
            let mut binding = lock(&self.shared.binding);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            binding.release();
            binding.current = None;
            self.shared.clear_slots();
        }
        if let Some(listener) = lock(&self.listener).take() {
            listener.cancel.cancel();
        }
        self.session.disconnect();
        debug!("device channel disconnected");
    }

    // ── State observation ────────────────────────────────────────

    pub fn current_device(&self) -> Option<DeviceId> {
        lock(&self.shared.binding).current.clone()
    }

    /// Both subscriptions for the current device are live.
    pub fn is_bound(&self) -> bool {
        let binding = lock(&self.shared.binding);
        binding.current.is_some()
            && binding.handles.len() == 2
            && binding.handles.iter().all(SubscriptionHandle::is_active)
    }

    /// Latest command status for the bound device.
    pub fn command_status(&self) -> Slot<CommandStatus> {
        self.shared.command_status.borrow().clone()
    }

    /// Latest presence event for the bound device.
    pub fn presence(&self) -> Slot<PresenceEvent> {
        self.shared.presence.borrow().clone()
    }

    pub fn watch_command_status(&self) -> SlotStream<CommandStatus> {
        SlotStream::new(self.shared.command_status.subscribe())
    }

    pub fn watch_presence(&self) -> SlotStream<PresenceEvent> {
        SlotStream::new(self.shared.presence.subscribe())
    }

    /// Malformed inbound payloads.
    pub fn errors(&self) -> broadcast::Receiver<Arc<CoreError>> {
        self.shared.errors.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connection_state(&self) -> watch::Receiver<SessionState> {
        self.session.watch_state()
    }

    pub fn session(&self) -> &StompSession<C> {
        &self.session
    }
}

impl<C: Connector> Drop for DeviceChannel<C> {
    fn drop(&mut self) {
        if let Some(listener) = lock(&self.listener).take() {
            listener.cancel.cancel();
        }
        lock(&self.shared.binding).release();
        self.session.disconnect();
    }
}

// ── Background listener ──────────────────────────────────────────

/// Rebind the current device after every (re)connect.
async fn listen<C: Connector>(
    session: StompSession<C>,
    shared: Weak<Shared>,
    mut events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    // The session may already be up.
    if session.is_connected() {
        rebind(&session, &shared, session.epoch());
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Connected { epoch }) => rebind(&session, &shared, epoch),
                Ok(SessionEvent::Disconnected { reason }) => {
                    debug!(reason = %reason, "channel lost connection");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events lagged, resyncing binding");
                    if session.is_connected() {
                        rebind(&session, &shared, session.epoch());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("channel listener exiting");
}

fn rebind<C: Connector>(session: &StompSession<C>, shared: &Weak<Shared>, epoch: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut binding = lock(&shared.binding);
    if binding.current.is_none() || binding.bound_epoch == Some(epoch) {
        return;
    }
    shared.bind(&mut binding, session);
}
