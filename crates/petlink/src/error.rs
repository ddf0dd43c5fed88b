//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use petlink_config::ConfigError;
use petlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const COMMAND_FAILED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the backend: {reason}")]
    #[diagnostic(
        code(petlink::connection_failed),
        help(
            "Check that the backend is running and the server URL is correct.\n\
             Try: petlink config show"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Device channel error: {message}")]
    #[diagnostic(code(petlink::channel))]
    Channel { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed for profile '{profile}'")]
    #[diagnostic(
        code(petlink::auth_failed),
        help(
            "The backend rejected the token and it has been cleared.\n\
             Store a new one with: petlink config set-token --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} not found: {detail}")]
    #[diagnostic(
        code(petlink::not_found),
        help("Check the device and request IDs printed by `petlink send`.")
    )]
    NotFound {
        resource_type: String,
        detail: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(petlink::api_error))]
    ApiError { code: String, message: String },

    #[error("Command {req_id} finished as {status}")]
    #[diagnostic(
        code(petlink::command_failed),
        help("Inspect it with: petlink command get {device} {req_id}")
    )]
    CommandFailed {
        device: String,
        req_id: String,
        status: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(petlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(petlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: petlink config init --server <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(petlink::no_config),
        help(
            "Create a profile with: petlink config init --server <URL>\n\
             Or pass --server / set PETLINK_SERVER.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(petlink::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("{operation} timed out after {millis}ms")]
    #[diagnostic(
        code(petlink::timeout),
        help("Increase the wait with --wait or --timeout, or check the device is online.")
    )]
    Timeout { operation: String, millis: u64 },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(petlink::json))]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Channel { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::CommandFailed { .. } => exit_code::COMMAND_FAILED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Convert a core error, naming `profile` in authentication help.
    pub fn from_core(err: CoreError, profile: &str) -> Self {
        match err {
            CoreError::Unauthorized { .. } => Self::AuthFailed {
                profile: profile.to_owned(),
            },
            other => other.into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => CliError::ConnectionFailed { reason },

            CoreError::NotConnected => CliError::Channel {
                message: "not connected".into(),
            },

            CoreError::Protocol { message } | CoreError::Internal(message) => {
                CliError::Channel { message }
            }

            CoreError::Decode {
                destination,
                message,
            } => CliError::Channel {
                message: format!("{destination}: {message}"),
            },

            CoreError::Timeout {
                operation,
                timeout_ms,
            } => CliError::Timeout {
                operation,
                millis: timeout_ms,
            },

            CoreError::Unauthorized { .. } => CliError::AuthFailed {
                profile: "current".into(),
            },

            CoreError::InvalidDeviceId { id, reason } => CliError::Validation {
                field: format!("device id '{id}'"),
                reason,
            },

            CoreError::Api {
                message,
                status: Some(404),
                ..
            } => CliError::NotFound {
                resource_type: "command".into(),
                detail: message,
            },

            CoreError::Api { message, code, .. } => CliError::ApiError {
                code: code.unwrap_or_else(|| "unknown".into()),
                message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_auth_exit_code() {
        let err = CliError::from_core(
            CoreError::Unauthorized {
                message: "expired".into(),
            },
            "lab",
        );
        assert_eq!(err.exit_code(), exit_code::AUTH);
        assert!(matches!(err, CliError::AuthFailed { ref profile } if profile == "lab"));
    }

    #[test]
    fn api_404_is_not_found() {
        let err: CliError = CoreError::Api {
            message: "no such command".into(),
            code: Some("B0404".into()),
            status: Some(404),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
    }

    #[test]
    fn invalid_device_id_is_usage_error() {
        let err: CliError = CoreError::InvalidDeviceId {
            id: "a/b".into(),
            reason: "contains '/'".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn timeout_keeps_operation() {
        let err: CliError = CoreError::Timeout {
            operation: "command r-1".into(),
            timeout_ms: 5000,
        }
        .into();
        assert_eq!(err.to_string(), "command r-1 timed out after 5000ms");
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
    }
}
