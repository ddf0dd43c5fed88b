use thiserror::Error;

/// Top-level error type for the `petlink-api` crate.
///
/// Covers every failure mode across both surfaces: the STOMP real-time
/// session and the REST command endpoints. `petlink-core` maps these into
/// domain-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected the bearer token (HTTP 401 or code `A0301`).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket connection failed or broke mid-stream.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket (or SockJS) closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// A handshake, request, or heart-beat deadline elapsed.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Protocol ────────────────────────────────────────────────────
    /// Malformed frame or unexpected frame sequence on the wire.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The broker answered with a STOMP `ERROR` frame.
    #[error("Broker error: {message}")]
    Broker { message: String, body: String },

    // ── Session ─────────────────────────────────────────────────────
    /// Operation requires a connected session.
    #[error("Session is not connected")]
    NotConnected,

    // ── REST API ────────────────────────────────────────────────────
    /// Structured error body from the REST API.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the stored token is no longer accepted.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` for failures the session recovers from by reconnecting.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for handshake or frame-format violations.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Broker { .. })
    }

    /// Extract the API error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
