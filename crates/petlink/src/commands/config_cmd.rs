//! Config subcommand handlers.

use std::io::BufRead;
use std::path::Path;

use petlink_config::{Config, ConfigError, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, InitArgs};
use crate::commands::config_path;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

// ── Helpers ─────────────────────────────────────────────────────────

/// Read a single line from stdin for `set-token` without an argument.
fn read_token_from_stdin() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}

fn redact(cfg: &mut Config) {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
}

/// Write `args` as the active profile, creating the file if needed.
fn init(args: InitArgs, global: &GlobalOpts, path: &Path) -> Result<(), CliError> {
    let mut cfg = petlink_config::load_config_from(path)?;
    let profile_name = cfg.active_profile_name(global.profile.as_deref());

    let mut profile = Profile::new(args.server);
    if let Some(ws_path) = args.ws_path {
        profile.ws_path = ws_path;
    }
    if let Some(prefix) = args.topic_prefix {
        profile.topic_prefix = prefix;
    }
    profile.sockjs = !args.no_sockjs;
    profile.token_env = args.token_env;

    // Reject profiles that could never connect.
    petlink_config::profile_to_channel_config(&profile, &cfg.defaults)?;

    let first = cfg.profiles.is_empty();
    cfg.profiles.insert(profile_name.clone(), profile);
    if args.set_default || first {
        cfg.default_profile = Some(profile_name.clone());
    }
    petlink_config::save_config_to(&cfg, path)?;

    if !global.quiet {
        eprintln!("✓ Profile '{profile_name}' written to {}", path.display());
        eprintln!("  Store a token with: petlink config set-token -p {profile_name}");
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config_path(global);

    match args.command {
        ConfigCommand::Init(init_args) => init(init_args, global, &path),

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let mut cfg = petlink_config::load_config_from(&path)?;
            redact(&mut cfg);
            let rendered = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            let out = output::render_single(
                global.output,
                &cfg,
                |_| rendered.clone(),
                |c| c.active_profile_name(None),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Tokens ──────────────────────────────────────────────────
        ConfigCommand::SetToken { token } => {
            let cfg = petlink_config::load_config_from(&path)?;
            let profile_name = cfg.active_profile_name(global.profile.as_deref());
            let token = match token {
                Some(token) => token,
                None => read_token_from_stdin()?,
            };
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            petlink_config::store_token(&profile_name, &token)?;
            if !global.quiet {
                eprintln!("✓ Token stored in system keyring for '{profile_name}'");
            }
            Ok(())
        }

        ConfigCommand::ClearToken => {
            let cfg = petlink_config::load_config_from(&path)?;
            let profile_name = cfg.active_profile_name(global.profile.as_deref());
            petlink_config::delete_token(&profile_name)?;
            if !global.quiet {
                eprintln!("✓ Token removed for '{profile_name}'");
            }
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }
    }
}
