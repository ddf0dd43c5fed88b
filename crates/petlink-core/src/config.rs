// ── Runtime connection configuration ──
//
// Describes *how* to reach the backend: REST base, STOMP endpoint, topic
// naming, and timing. Carries no credentials and never touches disk; the CLI
// builds a `ChannelConfig` from a profile and hands it in.

use std::time::Duration;

use url::Url;

use petlink_api::stomp::HeartBeat;
use petlink_api::transport::{TlsMode, TransportConfig, WsMode};
use petlink_api::{ReconnectConfig, SessionConfig};

use crate::error::CoreError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled web PKI roots (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (development backends).
    DangerAcceptInvalid,
}

/// Configuration for one backend.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// REST base URL (e.g. `https://console.example.com`).
    pub server: Url,
    /// STOMP endpoint; `http(s)` or `ws(s)`.
    pub ws_url: Url,
    /// Speak SockJS framing on the endpoint.
    pub sockjs: bool,
    /// Broker prefix for device topics.
    pub topic_prefix: String,
    pub tls: TlsVerification,
    /// REST request and channel handshake timeout.
    pub timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects before giving up. `None` = forever.
    pub max_retries: Option<u32>,
    /// Proposed heart-beat interval, both directions. Zero disables.
    pub heartbeat: Duration,
}

impl ChannelConfig {
    pub const DEFAULT_WS_PATH: &'static str = "/ws";
    pub const DEFAULT_TOPIC_PREFIX: &'static str = "/topic";

    /// Defaults for `server`, with the STOMP endpoint at `{server}/ws`.
    pub fn new(server: Url) -> Result<Self, CoreError> {
        let ws_url = endpoint_url(&server, Self::DEFAULT_WS_PATH)?;
        Ok(Self {
            server,
            ws_url,
            sockjs: true,
            topic_prefix: Self::DEFAULT_TOPIC_PREFIX.into(),
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(3000),
            max_retries: None,
            heartbeat: Duration::from_millis(10_000),
        })
    }

    /// Move the STOMP endpoint to another path under `server`.
    pub fn with_ws_path(mut self, ws_path: &str) -> Result<Self, CoreError> {
        self.ws_url = endpoint_url(&self.server, ws_path)?;
        Ok(self)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect: ReconnectConfig {
                delay: self.reconnect_delay,
                max_retries: self.max_retries,
            },
            heartbeat: HeartBeat {
                outgoing: self.heartbeat,
                incoming: self.heartbeat,
            },
            connect_timeout: self.timeout,
            host: self.server.host_str().map(str::to_owned),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
        }
    }

    pub fn ws_mode(&self) -> WsMode {
        if self.sockjs {
            WsMode::SockJs
        } else {
            WsMode::Plain
        }
    }
}

/// `{server}{path}`, keeping any base path on `server`.
fn endpoint_url(server: &Url, path: &str) -> Result<Url, CoreError> {
    let joined = format!(
        "{}/{}",
        server.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| CoreError::Config {
        message: format!("invalid channel endpoint '{joined}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ChannelConfig::new(Url::parse("https://console.example.com").unwrap()).unwrap();
        assert_eq!(config.ws_url.as_str(), "https://console.example.com/ws");
        assert_eq!(config.topic_prefix, "/topic");
        assert!(config.sockjs);
        assert_eq!(config.ws_mode(), WsMode::SockJs);

        let session = config.session_config();
        assert_eq!(session.reconnect.delay, Duration::from_millis(3000));
        assert_eq!(session.heartbeat.header_value(), "10000,10000");
        assert_eq!(session.host.as_deref(), Some("console.example.com"));
    }

    #[test]
    fn ws_path_keeps_base_path() {
        let config = ChannelConfig::new(Url::parse("http://localhost:8080/backend/").unwrap())
            .unwrap()
            .with_ws_path("/stomp")
            .unwrap();
        assert_eq!(config.ws_url.as_str(), "http://localhost:8080/backend/stomp");
    }
}
