//! Command dispatch: bridges CLI args -> core console -> output formatting.

pub mod command;
pub mod config_cmd;
pub mod send;
pub mod util;
pub mod watch;

use std::path::PathBuf;

use petlink_core::{DeviceConsole, WsConnector};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Everything a backend-bound command needs.
pub struct Context {
    pub console: DeviceConsole<WsConnector>,
    /// Active profile name, for help text.
    pub profile: String,
}

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let result = match cmd {
        Command::Watch(args) => watch::handle(ctx, args, global).await,
        Command::Send(args) => send::handle(ctx, args, global).await,
        Command::Commands(args) => command::handle(ctx, args, global).await,
        // Config is handled before dispatch
        Command::Config(_) => Ok(()),
    };
    ctx.console.channel().disconnect();
    result
}

/// `--config`, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(petlink_config::config_path)
}
