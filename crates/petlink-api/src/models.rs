// Wire models shared by the real-time topics and the REST command endpoints.
//
// Field names follow the backend's camelCase JSON. Unknown command-status
// fields are captured in `extra` so nothing the backend sends is dropped.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumString;

// ── CommandState ─────────────────────────────────────────────────────

/// Lifecycle status of a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(from = "String", into = "String")]
pub enum CommandState {
    Pending,
    Sent,
    Acked,
    Failed,
    Timeout,
    /// A status this client does not know, kept verbatim.
    #[strum(disabled)]
    Other(String),
}

impl CommandState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Acked => "ACKED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Other(raw) => raw,
        }
    }

    /// The backend will not move the command any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::Failed | Self::Timeout)
    }
}

impl From<String> for CommandState {
    fn from(raw: String) -> Self {
        Self::from_str(&raw).unwrap_or(Self::Other(raw))
    }
}

impl From<CommandState> for String {
    fn from(state: CommandState) -> Self {
        match state {
            CommandState::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── CommandStatus ────────────────────────────────────────────────────

/// Acknowledgement record for a dispatched command.
///
/// Pushed on `/device/{id}/command-status` and returned by every REST
/// command endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
    pub req_id: String,
    pub device_id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    pub status: CommandState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// All remaining fields the backend sends.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── PresenceEvent ────────────────────────────────────────────────────

/// Online/offline notification pushed on `/device/{id}/presence`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub device_id: String,
    pub online: bool,
    pub ts: DateTime<Utc>,
}

// ── REST bodies ──────────────────────────────────────────────────────

/// Body of `POST /api/devices/{id}/commands`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCreateRequest {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl CommandCreateRequest {
    pub fn new(command_type: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Map<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
