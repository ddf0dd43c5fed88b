//! `command get|retry`: inspect or re-dispatch a command over REST.

use crate::cli::{CommandsArgs, CommandsCommand, GlobalOpts};
use crate::commands::Context;
use crate::commands::util::parse_device;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: CommandsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let status = match args.command {
        CommandsCommand::Get { device, req_id } => {
            let device = parse_device(&device)?;
            ctx.console.get_command(&device, &req_id).await
        }
        CommandsCommand::Retry { device, req_id } => {
            let device = parse_device(&device)?;
            ctx.console.retry_command(&device, &req_id).await
        }
    }
    .map_err(|e| CliError::from_core(e, &ctx.profile))?;

    let color = output::should_color(global.color);
    let out = output::render_status(global.output, &status, color)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
