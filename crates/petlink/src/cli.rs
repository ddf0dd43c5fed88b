//! Clap derive structures for the `petlink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// petlink -- follow and command desk-pet devices
#[derive(Debug, Parser)]
#[command(
    name = "petlink",
    version,
    about = "Follow and command desk-pet devices from the terminal",
    long_about = "Watches device command-status and presence over the backend's\n\
        STOMP channel and dispatches commands through the REST API.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "PETLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "PETLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend URL (overrides profile)
    #[arg(long, short = 's', env = "PETLINK_SERVER", global = true)]
    pub server: Option<String>,

    /// Bearer token (overrides keyring and profile)
    #[arg(long, env = "PETLINK_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PETLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', env = "PETLINK_INSECURE", global = true)]
    pub insecure: bool,

    /// Request and handshake timeout in seconds
    #[arg(long, env = "PETLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream command-status and presence updates for devices
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Dispatch a command to a device
    Send(SendArgs),

    /// Inspect or retry dispatched commands
    #[command(name = "command", alias = "cmd")]
    Commands(CommandsArgs),

    /// Manage configuration and tokens
    Config(ConfigArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Device IDs; the channel binds to the first
    #[arg(required = true, num_args = 1..)]
    pub devices: Vec<String>,

    /// Rotate the binding through the devices every N seconds
    #[arg(long, value_name = "SECS")]
    pub switch_every: Option<u64>,

    /// Stop after N seconds (default: until Ctrl-C)
    #[arg(long = "for", value_name = "SECS")]
    pub duration: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SEND
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Target device ID
    pub device: String,

    /// Command type (e.g. "feed", "reboot")
    #[arg(value_name = "TYPE")]
    pub command_type: String,

    /// JSON object passed as the command payload
    #[arg(long)]
    pub payload: Option<String>,

    /// Wait up to N seconds for ACKED, FAILED or TIMEOUT
    #[arg(long, value_name = "SECS")]
    pub wait: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMMAND
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CommandsArgs {
    #[command(subcommand)]
    pub command: CommandsCommand,
}

#[derive(Debug, Subcommand)]
pub enum CommandsCommand {
    /// Fetch the current status of a command
    Get {
        /// Device ID
        device: String,
        /// Request ID returned by `send`
        req_id: String,
    },

    /// Re-dispatch a command
    Retry {
        /// Device ID
        device: String,
        /// Request ID returned by `send`
        req_id: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile
    Init(InitArgs),

    /// Display the current configuration (tokens redacted)
    Show,

    /// Store a token in the system keyring (reads stdin if omitted)
    SetToken {
        /// Token value
        token: Option<String>,
    },

    /// Remove the stored token from the system keyring
    ClearToken,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Backend URL
    #[arg(long)]
    pub server: String,

    /// STOMP endpoint path under the server
    #[arg(long)]
    pub ws_path: Option<String>,

    /// Topic prefix on the broker
    #[arg(long)]
    pub topic_prefix: Option<String>,

    /// Endpoint is a plain WebSocket rather than SockJS
    #[arg(long)]
    pub no_sockjs: bool,

    /// Environment variable to read the token from
    #[arg(long)]
    pub token_env: Option<String>,

    /// Make this the default profile
    #[arg(long)]
    pub set_default: bool,
}
