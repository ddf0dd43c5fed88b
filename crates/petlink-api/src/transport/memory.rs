//! In-process transport.
//!
//! [`MemoryConnector`] hands each opened connection to a [`MemoryListener`]
//! as a [`MemoryPeer`], which plays the server side. Used to embed a broker
//! in the same process and to drive the session from tests without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::{ConnectRequest, Connection, Connector};
use crate::error::Error;

#[derive(Debug, Default)]
struct Shared {
    opens: AtomicUsize,
    closes: AtomicUsize,
    refusing: AtomicBool,
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Server side: yields one [`MemoryPeer`] per accepted connection.
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create a connected connector/listener pair.
    pub fn pair() -> (Self, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Self {
                accept_tx,
                shared: Arc::clone(&shared),
            },
            MemoryListener { accept_rx, shared },
        )
    }

    /// Number of `open` calls so far, refused ones included.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// While set, every `open` fails with a connect error.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of connections the client closed explicitly.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn open(&self, request: &ConnectRequest) -> Result<MemoryConnection, Error> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(Error::WebSocketConnect("connection refused".into()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            request: request.clone(),
            sender: MemorySender { tx: to_client },
            inbound: from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| Error::WebSocketConnect("listener closed".into()))?;

        Ok(MemoryConnection {
            to_server,
            from_server,
            shared: Arc::clone(&self.shared),
        })
    }
}

// ── Client connection ────────────────────────────────────────────────

#[derive(Debug)]
pub struct MemoryConnection {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<Result<String, Error>>,
    shared: Arc<Shared>,
}

impl Connection for MemoryConnection {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        self.to_server.send(text).map_err(|_| Error::WebSocketClosed {
            code: 1006,
            reason: "peer gone".into(),
        })
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        self.from_server.recv().await
    }

    async fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.from_server.close();
    }
}

// ── Server side ──────────────────────────────────────────────────────

/// Cloneable handle for pushing text (or a failure) to one client.
#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<Result<String, Error>>,
}

impl MemorySender {
    /// Returns `false` once the client side is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx.send(Ok(text.into())).is_ok()
    }

    /// Break the connection with a transport error on the client side.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(Err(Error::WebSocketConnect(reason.into())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One accepted connection, seen from the server.
///
/// The client observes a clean close once the peer and every
/// [`MemorySender`] cloned from it are dropped.
#[derive(Debug)]
pub struct MemoryPeer {
    request: ConnectRequest,
    sender: MemorySender,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    pub fn sender(&self) -> MemorySender {
        self.sender.clone()
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.sender.send(text)
    }

    /// Next text from the client; `None` once the client dropped its end.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}
