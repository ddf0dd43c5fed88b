// ── Core error types ──
//
// User-facing errors from petlink-core. Consumers never see raw STOMP or
// HTTP details; the `From<petlink_api::Error>` impl translates them into
// domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the device channel: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Device channel is not connected")]
    NotConnected,

    #[error("Channel protocol error: {message}")]
    Protocol { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    /// An inbound channel payload could not be decoded. The frame was dropped.
    #[error("Malformed payload on {destination}: {message}")]
    Decode {
        destination: String,
        message: String,
    },

    #[error("Invalid device id '{id}': {reason}")]
    InvalidDeviceId { id: String, reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Backend error code (e.g. "A0301").
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stored token was rejected and has been cleared.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<petlink_api::Error> for CoreError {
    fn from(err: petlink_api::Error) -> Self {
        match err {
            petlink_api::Error::Unauthorized { message } => CoreError::Unauthorized { message },
            petlink_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout {
                        operation: "HTTP request".into(),
                        timeout_ms: 0,
                    }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            petlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            petlink_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            petlink_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                reason: format!("WebSocket connection failed: {reason}"),
            },
            petlink_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            petlink_api::Error::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation: operation.to_owned(),
                timeout_ms,
            },
            petlink_api::Error::Protocol(message) => CoreError::Protocol { message },
            petlink_api::Error::Broker { message, .. } => CoreError::Protocol {
                message: format!("broker error: {message}"),
            },
            petlink_api::Error::NotConnected => CoreError::NotConnected,
            petlink_api::Error::Api {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            petlink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
