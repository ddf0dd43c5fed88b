//! Shared configuration for petlink tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `petlink_core::ChannelConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use petlink_core::{ChannelConfig, TlsVerification, TokenStore};

/// Keyring service name; entries are keyed `<profile>/token`.
pub const KEYRING_SERVICE: &str = "petlink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Profile to use: the explicit name, else `default_profile`, else "default".
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| ConfigError::UnknownProfile {
            name: name.into(),
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Request and handshake timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Proposed heart-beat interval; 0 disables.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_heartbeat_ms() -> u64 {
    10_000
}

/// A named backend profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// REST base URL (e.g., "https://console.example.com").
    pub server: String,

    /// STOMP endpoint path under `server`.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Endpoint speaks SockJS.
    #[serde(default = "default_sockjs")]
    pub sockjs: bool,

    /// Broker prefix for device topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Environment variable name containing the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Token (plaintext fallback after env var and keyring).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Path to custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    /// Override timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Give up after this many consecutive failed reconnects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Profile {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ws_path: default_ws_path(),
            sockjs: default_sockjs(),
            topic_prefix: default_topic_prefix(),
            token_env: None,
            token: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            max_retries: None,
        }
    }
}

fn default_ws_path() -> String {
    ChannelConfig::DEFAULT_WS_PATH.into()
}
fn default_sockjs() -> bool {
    true
}
fn default_topic_prefix() -> String {
    ChannelConfig::DEFAULT_TOPIC_PREFIX.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "deskpet", "petlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("petlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, merged with `PETLINK_*` variables
/// (`__` separates nesting, e.g. `PETLINK_DEFAULTS__TIMEOUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PETLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

fn keyring_token(profile_name: &str) -> Option<String> {
    keyring_entry(profile_name).ok()?.get_password().ok()
}

/// Resolve the token: `token_env` variable → keyring → plaintext.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    resolve_token_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_token,
    )
}

fn resolve_token_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(value) = profile.token_env.as_deref().and_then(&env) {
        debug!(profile = profile_name, "token from environment");
        return Some(SecretString::from(value));
    }

    // 2. System keyring
    if let Some(value) = keyring(profile_name) {
        debug!(profile = profile_name, "token from keyring");
        return Some(SecretString::from(value));
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?
        .set_password(token)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Remove the keyring token for `profile_name`. Missing entries are fine.
pub fn delete_token(profile_name: &str) -> Result<(), ConfigError> {
    match keyring_entry(profile_name)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(ConfigError::Keyring(e.to_string())),
    }
}

/// [`TokenStore`] backed by a profile's resolution chain.
///
/// Reads the chain on every call. `clear()` deletes the keyring entry and
/// stops returning env or plaintext tokens for the rest of the process.
#[derive(Debug)]
pub struct ProfileTokenStore {
    profile: Profile,
    profile_name: String,
    cleared: AtomicBool,
}

impl ProfileTokenStore {
    pub fn new(profile: Profile, profile_name: impl Into<String>) -> Self {
        Self {
            profile,
            profile_name: profile_name.into(),
            cleared: AtomicBool::new(false),
        }
    }
}

impl TokenStore for ProfileTokenStore {
    fn token(&self) -> Option<SecretString> {
        if self.cleared.load(Ordering::SeqCst) {
            return None;
        }
        resolve_token(&self.profile, &self.profile_name)
    }

    fn clear(&self) {
        self.cleared.store(true, Ordering::SeqCst);
        if let Err(e) = delete_token(&self.profile_name) {
            tracing::warn!(profile = %self.profile_name, error = %e, "failed to clear stored token");
        }
    }
}

// ── Profile → ChannelConfig ─────────────────────────────────────────

/// Build a `ChannelConfig` from a profile and the global defaults.
pub fn profile_to_channel_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ChannelConfig, ConfigError> {
    let server: url::Url = profile
        .server
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "server".into(),
            reason: format!("invalid URL: {}", profile.server),
        })?;

    let validation = |field: &str, e: petlink_core::CoreError| ConfigError::Validation {
        field: field.into(),
        reason: e.to_string(),
    };

    let mut config = ChannelConfig::new(server)
        .map_err(|e| validation("server", e))?
        .with_ws_path(&profile.ws_path)
        .map_err(|e| validation("ws_path", e))?;

    config.sockjs = profile.sockjs;
    config.topic_prefix.clone_from(&profile.topic_prefix);
    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.reconnect_delay = Duration::from_millis(defaults.reconnect_delay_ms);
    config.heartbeat = Duration::from_millis(defaults.heartbeat_ms);
    config.max_retries = profile.max_retries;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "lab"

[defaults]
timeout = 5
reconnect_delay_ms = 1500

[profiles.lab]
server = "https://lab.example.com/console"
ws_path = "/stomp"
sockjs = false
token_env = "LAB_TOKEN"
token = "plain-token"

[profiles.prod]
server = "https://console.example.com"
"#;

    fn write_sample() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        (dir, path)
    }

    #[test]
    fn loads_profiles_with_defaults() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();

        assert_eq!(config.active_profile_name(None), "lab");
        assert_eq!(config.active_profile_name(Some("prod")), "prod");
        assert_eq!(config.defaults.timeout, 5);
        assert_eq!(config.defaults.reconnect_delay_ms, 1500);
        assert_eq!(config.defaults.heartbeat_ms, 10_000);

        let prod = config.profile("prod").unwrap();
        assert_eq!(prod.ws_path, "/ws");
        assert!(prod.sockjs);
        assert_eq!(prod.topic_prefix, "/topic");
        assert!(prod.token.is_none());

        assert!(matches!(
            config.profile("staging"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.active_profile_name(None), "default");
        assert!(config.profiles.is_empty());
        assert_eq!(config.defaults.output, "table");
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config
            .profiles
            .insert("default".into(), Profile::new("http://localhost:8080"));
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let profile = loaded.profile("default").unwrap();
        assert_eq!(profile.server, "http://localhost:8080");
        assert_eq!(profile.ws_path, "/ws");
    }

    #[test]
    fn token_chain_prefers_env_then_keyring_then_plaintext() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();
        let lab = config.profile("lab").unwrap();

        let env = |name: &str| (name == "LAB_TOKEN").then(|| "env-token".to_string());
        let keyring = |profile: &str| (profile == "lab").then(|| "ring-token".to_string());
        let none = |_: &str| None;

        let token = resolve_token_with(lab, "lab", env, keyring).unwrap();
        assert_eq!(token.expose_secret(), "env-token");

        let token = resolve_token_with(lab, "lab", none, keyring).unwrap();
        assert_eq!(token.expose_secret(), "ring-token");

        let token = resolve_token_with(lab, "lab", none, none).unwrap();
        assert_eq!(token.expose_secret(), "plain-token");

        let prod = config.profile("prod").unwrap();
        assert!(resolve_token_with(prod, "prod", env, none).is_none());
    }

    #[test]
    fn builds_channel_config() {
        let (_dir, path) = write_sample();
        let config = load_config_from(&path).unwrap();

        let channel =
            profile_to_channel_config(config.profile("lab").unwrap(), &config.defaults).unwrap();
        assert_eq!(channel.server.as_str(), "https://lab.example.com/console");
        assert_eq!(channel.ws_url.as_str(), "https://lab.example.com/console/stomp");
        assert!(!channel.sockjs);
        assert_eq!(channel.timeout, Duration::from_secs(5));
        assert_eq!(channel.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(channel.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn rejects_bad_server_url() {
        let err = profile_to_channel_config(&Profile::new("not a url"), &Defaults::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server"));
    }
}
