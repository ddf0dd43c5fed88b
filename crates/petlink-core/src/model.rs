// Domain identifiers and topic naming.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub use petlink_api::models::{CommandCreateRequest, CommandState, CommandStatus, PresenceEvent};

/// Identifier of a device. Non-empty, no `/`, no whitespace: it is
/// interpolated into broker destinations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.contains('/') {
            Some("must not contain '/'")
        } else if id.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidDeviceId {
                id,
                reason: reason.into(),
            }),
            None => Ok(Self(id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker destinations for this device under `prefix`.
    pub fn topics(&self, prefix: &str) -> DeviceTopics {
        let base = format!("{}/device/{}", prefix.trim_end_matches('/'), self.0);
        DeviceTopics {
            command_status: format!("{base}/command-status"),
            presence: format!("{base}/presence"),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// The two destinations a bound device is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub command_status: String,
    pub presence: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rejects_unsafe_ids() {
        assert!(DeviceId::new("").is_err());
        assert!(DeviceId::new("a/b").is_err());
        assert!(DeviceId::new("a b").is_err());
        assert!(DeviceId::new("a\tb").is_err());
        assert_eq!(DeviceId::new("DP-0001").unwrap().as_str(), "DP-0001");
    }

    #[test]
    fn builds_topics() {
        let id: DeviceId = "D1".parse().unwrap();
        assert_eq!(
            id.topics("/topic"),
            DeviceTopics {
                command_status: "/topic/device/D1/command-status".into(),
                presence: "/topic/device/D1/presence".into(),
            }
        );
        assert_eq!(id.topics("/exchange/amq.topic/").presence, "/exchange/amq.topic/device/D1/presence");
    }

    #[test]
    fn serde_validates() {
        let id: DeviceId = serde_json::from_str(r#""D7""#).unwrap();
        assert_eq!(id.to_string(), "D7");
        assert!(serde_json::from_str::<DeviceId>(r#""x/y""#).is_err());
    }
}
