//! SockJS framing for the raw WebSocket transport.
//!
//! The server prefixes every WebSocket text message with a one-letter frame
//! type: `o` (open), `h` (heart-beat), `a` (JSON array of messages), `c`
//! (close with `[code, reason]`). Client messages are sent as a JSON array of
//! strings.

use url::Url;

use crate::error::Error;

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

pub fn decode(text: &str) -> Result<SockJsFrame, Error> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| Error::Protocol("empty SockJS frame".into()))?;
    let rest = chars.as_str();

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => serde_json::from_str::<Vec<String>>(rest)
            .map(SockJsFrame::Messages)
            .map_err(|e| Error::Protocol(format!("invalid SockJS message array: {e}"))),
        'c' => serde_json::from_str::<(u16, String)>(rest)
            .map(|(code, reason)| SockJsFrame::Close { code, reason })
            .map_err(|e| Error::Protocol(format!("invalid SockJS close frame: {e}"))),
        other => Err(Error::Protocol(format!("unknown SockJS frame type '{other}'"))),
    }
}

pub fn encode(payload: &str) -> String {
    // A one-element array of strings always serializes.
    serde_json::to_string(&[payload]).unwrap_or_else(|_| String::from("[]"))
}

/// Raw WebSocket URL for a SockJS endpoint:
/// `{endpoint}/{server-id}/{session-id}/websocket` with a ws/wss scheme.
pub fn websocket_url(endpoint: &Url, server_id: u16, session_id: &str) -> Result<Url, Error> {
    let mut url = super::websocket::ws_scheme(endpoint)?;
    url.path_segments_mut()
        .map_err(|()| Error::WebSocketConnect(format!("{endpoint} cannot be a base URL")))?
        .pop_if_empty()
        .push(&format!("{:03}", server_id % 1000))
        .push(session_id)
        .push("websocket");
    Ok(url)
}
