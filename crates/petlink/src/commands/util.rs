//! Shared helpers for command handlers.

use petlink_core::DeviceId;

use crate::error::CliError;

/// Validate a device identifier from the command line.
pub fn parse_device(raw: &str) -> Result<DeviceId, CliError> {
    DeviceId::new(raw).map_err(CliError::from)
}

/// Parse `--payload` into a JSON object. Absent means empty.
pub fn parse_payload(
    raw: Option<&str>,
) -> Result<serde_json::Map<String, serde_json::Value>, CliError> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: "payload".into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults_to_empty_object() {
        assert!(parse_payload(None).unwrap().is_empty());
    }

    #[test]
    fn payload_must_be_an_object() {
        let err = parse_payload(Some("[1,2]")).unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "payload"));

        let map = parse_payload(Some(r#"{"grams": 20}"#)).unwrap();
        assert_eq!(map["grams"], 20);
    }

    #[test]
    fn malformed_payload_is_json_error() {
        assert!(matches!(parse_payload(Some("{")), Err(CliError::Json(_))));
    }

    #[test]
    fn device_ids_are_validated() {
        assert_eq!(parse_device("D1").unwrap().as_str(), "D1");
        assert!(matches!(
            parse_device(""),
            Err(CliError::Validation { .. })
        ));
    }
}
