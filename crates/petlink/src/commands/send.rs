//! `send`: dispatch a command, optionally waiting for its outcome.

use std::time::Duration;

use tracing::debug;

use petlink_core::{CommandCreateRequest, CommandState};

use crate::cli::{GlobalOpts, SendArgs};
use crate::commands::Context;
use crate::commands::util::{parse_device, parse_payload};
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context, args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device = parse_device(&args.device)?;
    let request = CommandCreateRequest::new(args.command_type)
        .with_payload(parse_payload(args.payload.as_deref())?);

    let status = match args.wait {
        Some(secs) => {
            debug!(device = %device, wait_secs = secs, "sending and waiting");
            ctx.console
                .send_and_wait(&device, &request, Duration::from_secs(secs))
                .await
        }
        None => ctx.console.send_command(&device, &request).await,
    }
    .map_err(|e| CliError::from_core(e, &ctx.profile))?;

    let color = output::should_color(global.color);
    let out = output::render_status(global.output, &status, color)?;
    output::print_output(&out, global.quiet);

    // Only a waited-for outcome decides the exit code.
    if args.wait.is_some() && matches!(status.status, CommandState::Failed | CommandState::Timeout)
    {
        return Err(CliError::CommandFailed {
            device: device.to_string(),
            req_id: status.req_id,
            status: status.status.to_string(),
        });
    }
    Ok(())
}
