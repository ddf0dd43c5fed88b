// Transport layer: byte/text carriers below the STOMP session, plus the
// shared HTTP client configuration used by the REST command client.
//
// A `Connector` dials one connection per session attempt. The session owns
// the resulting `Connection` exclusively and drives it from a single task,
// so implementations need no internal locking.

pub mod memory;
pub mod sockjs;
pub mod websocket;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, MemorySender};
pub use websocket::{WsConnector, WsMode};

// ── Connection traits ────────────────────────────────────────────────

/// What the session asks a connector to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Endpoint URL (`http(s)` or `ws(s)`; connectors map the scheme).
    pub url: Url,
    /// Extra headers for the upgrade request.
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }
}

/// Opens transport connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn open(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = Result<Self::Connection, Error>> + Send;
}

/// A full-duplex text connection.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`
/// alongside timers and outbound commands.
pub trait Connection: Send + 'static {
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), Error>> + Send;

    /// Next inbound text. `None` means the peer closed the connection cleanly.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String, Error>>> + Send;

    /// Best-effort close; errors are swallowed.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

// ── HTTP transport configuration ─────────────────────────────────────

/// TLS verification mode for HTTP clients.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled web PKI roots.
    #[default]
    System,
    /// Trust an additional CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (development backends only).
    DangerAcceptInvalid,
}

/// Shared configuration for building `reqwest::Client` instances.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("petlink/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
