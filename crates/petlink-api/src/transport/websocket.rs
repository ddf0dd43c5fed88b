//! WebSocket transport on tokio-tungstenite.
//!
//! In SockJS mode the connector dials the endpoint's raw WebSocket URL and
//! unwraps SockJS framing, so the session above only ever sees STOMP text.
//! SockJS heart-beats surface as empty strings: they carry no frames but
//! still count as inbound activity.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::sockjs::{self, SockJsFrame};
use super::{ConnectRequest, Connection, Connector};
use crate::error::Error;

/// How the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsMode {
    /// SockJS endpoint (Spring `withSockJS()`); uses its raw WebSocket transport.
    #[default]
    SockJs,
    /// Plain WebSocket carrying STOMP text directly.
    Plain,
}

/// Dials WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConnector {
    mode: WsMode,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(mode: WsMode, connect_timeout: Duration) -> Self {
        Self {
            mode,
            connect_timeout,
        }
    }

    fn target_url(&self, endpoint: &Url) -> Result<Url, Error> {
        match self.mode {
            WsMode::Plain => ws_scheme(endpoint),
            WsMode::SockJs => {
                let session = uuid::Uuid::new_v4();
                let server_id = u16::from_be_bytes([session.as_bytes()[0], session.as_bytes()[1]]);
                sockjs::websocket_url(endpoint, server_id, &session.simple().to_string())
            }
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(WsMode::SockJs, Duration::from_secs(10))
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn open(&self, request: &ConnectRequest) -> Result<WsConnection, Error> {
        let url = self.target_url(&request.url)?;
        tracing::info!(url = %url, mode = ?self.mode, "Connecting to WebSocket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let mut upgrade = ClientRequestBuilder::new(uri);
        for (name, value) in &request.headers {
            upgrade = upgrade.with_header(name.clone(), value.clone());
        }

        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(upgrade))
                .await
                .map_err(|_| Error::Timeout {
                    operation: "WebSocket connect",
                    timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
                })?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("WebSocket connected");

        Ok(WsConnection {
            stream,
            sockjs: (self.mode == WsMode::SockJs).then(VecDeque::new),
        })
    }
}

/// Map `http`/`https` endpoints onto `ws`/`wss`.
pub(crate) fn ws_scheme(endpoint: &Url) -> Result<Url, Error> {
    let mut url = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot use scheme {scheme} for {endpoint}")))?;
    Ok(url)
}

// ── WsConnection ─────────────────────────────────────────────────────

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Messages unpacked from a SockJS array, not yet handed out.
    /// `None` in plain mode.
    sockjs: Option<VecDeque<String>>,
}

impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        let wire = if self.sockjs.is_some() {
            sockjs::encode(&text)
        } else {
            text
        };
        self.stream
            .send(tungstenite::Message::Text(wire.into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, Error>> {
        loop {
            if let Some(pending) = self.sockjs.as_mut().and_then(VecDeque::pop_front) {
                return Some(Ok(pending));
            }

            let text = match self.stream.next().await? {
                Ok(tungstenite::Message::Text(text)) => text.as_str().to_owned(),
                Ok(tungstenite::Message::Close(frame)) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(
                            code = %cf.code,
                            reason = %cf.reason,
                            "WebSocket close frame received"
                        );
                    } else {
                        tracing::info!("WebSocket close frame received (no payload)");
                    }
                    return None;
                }
                Ok(tungstenite::Message::Ping(_)) => {
                    // tungstenite handles pong replies automatically
                    tracing::trace!("WebSocket ping");
                    continue;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(Error::WebSocketConnect(e.to_string()))),
            };

            let Some(queue) = self.sockjs.as_mut() else {
                return Some(Ok(text));
            };

            match sockjs::decode(&text) {
                Ok(SockJsFrame::Open) => tracing::debug!("SockJS session open"),
                Ok(SockJsFrame::Heartbeat) => return Some(Ok(String::new())),
                Ok(SockJsFrame::Messages(messages)) => queue.extend(messages),
                Ok(SockJsFrame::Close { code, reason }) => {
                    return Some(Err(Error::WebSocketClosed { code, reason }));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
