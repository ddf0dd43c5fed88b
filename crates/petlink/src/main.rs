mod cli;
mod commands;
mod error;
mod output;

use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

use petlink_config::{Config, Profile, ProfileTokenStore};
use petlink_core::{DeviceConsole, MemoryTokenStore, TokenStore};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::commands::Context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a backend
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        cmd => {
            let ctx = build_context(&cli.global)?;
            tracing::debug!(command = ?cmd, profile = %ctx.profile, "dispatching command");
            commands::dispatch(cmd, &ctx, &cli.global).await
        }
    }
}

/// Build the console from the config file, profile, and CLI overrides.
fn build_context(global: &GlobalOpts) -> Result<Context, CliError> {
    let path = commands::config_path(global);
    let cfg = petlink_config::load_config_from(&path)?;
    let profile_name = cfg.active_profile_name(global.profile.as_deref());
    let profile = resolve_profile(&cfg, &profile_name, global)?;

    let channel_config = petlink_config::profile_to_channel_config(&profile, &cfg.defaults)?;

    let tokens: Arc<dyn TokenStore> = match global.token {
        Some(ref token) => Arc::new(MemoryTokenStore::new(Some(SecretString::from(
            token.clone(),
        )))),
        None => Arc::new(ProfileTokenStore::new(profile, profile_name.clone())),
    };

    let console = DeviceConsole::new(&channel_config, tokens)?;
    Ok(Context {
        console,
        profile: profile_name,
    })
}

/// The named profile with flag overrides applied. Without a profile,
/// `--server` alone is enough.
fn resolve_profile(cfg: &Config, name: &str, global: &GlobalOpts) -> Result<Profile, CliError> {
    let mut profile = match (cfg.profiles.get(name), global.server.as_deref()) {
        (Some(profile), _) => profile.clone(),
        (None, Some(server)) => Profile::new(server),
        (None, None) if global.profile.is_some() => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: name.to_owned(),
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        (None, None) => {
            return Err(CliError::NoConfig {
                path: commands::config_path(global).display().to_string(),
            });
        }
    };

    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
    Ok(profile)
}
