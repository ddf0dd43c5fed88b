//! `watch`: stream command-status and presence for one device at a time.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::warn;

use petlink_core::{CommandStatus, DeviceId, PresenceEvent, SessionState};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::commands::Context;
use crate::commands::util::parse_device;
use crate::error::CliError;
use crate::output;

/// One line of structured watch output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
enum WatchEvent<'a> {
    CommandStatus(&'a CommandStatus),
    Presence(&'a PresenceEvent),
    Connection { state: String },
    Bound { device: &'a str },
}

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
}

impl Printer {
    fn emit(&self, event: &WatchEvent<'_>) -> Result<(), CliError> {
        let line = match self.format {
            OutputFormat::Json => output::render_json(event, false)?,
            OutputFormat::JsonCompact => output::render_json(event, true)?,
            OutputFormat::Table => match event {
                WatchEvent::CommandStatus(s) => output::status_line(s, self.color),
                WatchEvent::Presence(p) => output::presence_line(p, self.color),
                WatchEvent::Connection { state } => output::notice_line(state, self.color),
                WatchEvent::Bound { device } => {
                    output::notice_line(&format!("watching {device}"), self.color)
                }
            },
            OutputFormat::Plain => match event {
                WatchEvent::CommandStatus(s) => format!("{} {}", s.req_id, s.status),
                WatchEvent::Presence(p) => {
                    format!("{} {}", p.device_id, if p.online { "online" } else { "offline" })
                }
                // Plain output carries data only.
                WatchEvent::Connection { .. } | WatchEvent::Bound { .. } => return Ok(()),
            },
        };
        output::print_output(&line, self.quiet);
        Ok(())
    }
}

fn describe(state: &SessionState) -> String {
    match state {
        SessionState::Disconnected => "disconnected".into(),
        SessionState::Connecting => "connecting".into(),
        SessionState::Connected => "connected".into(),
        SessionState::Reconnecting { attempt } => {
            format!("connection lost, reconnecting (attempt {attempt})")
        }
        SessionState::Failed => "gave up reconnecting".into(),
    }
}

/// Next rotation tick, or never without `--switch-every`.
async fn tick(rotation: &mut Option<Interval>) {
    match rotation {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn stop_after(duration: Option<u64>) {
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

pub async fn handle(ctx: &Context, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let devices: Vec<DeviceId> = args
        .devices
        .into_iter()
        .map(|d| parse_device(&d))
        .collect::<Result<_, _>>()?;
    let Some(first) = devices.first().cloned() else {
        return Err(CliError::Validation {
            field: "devices".into(),
            reason: "at least one device is required".into(),
        });
    };

    let printer = Printer {
        format: global.output,
        color: output::should_color(global.color),
        quiet: global.quiet,
    };

    let rotation = args.switch_every.filter(|_| devices.len() > 1).map(|secs| {
        let period = Duration::from_secs(secs.max(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let channel = ctx.console.channel();
    channel.subscribe_device(first.clone());
    channel.connect();
    printer.emit(&WatchEvent::Bound {
        device: first.as_str(),
    })?;

    let order = devices.iter().cycle().skip(1);
    follow(ctx, &printer, rotation, order, args.duration).await
}

async fn follow<'a>(
    ctx: &Context,
    printer: &Printer,
    mut rotation: Option<Interval>,
    mut order: impl Iterator<Item = &'a DeviceId>,
    duration: Option<u64>,
) -> Result<(), CliError> {
    let channel = ctx.console.channel();
    let mut status = channel.watch_command_status();
    let mut presence = channel.watch_presence();
    let mut state = channel.connection_state();
    let mut errors = channel.errors();

    let stop = stop_after(duration);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut stop => break,
            changed = status.changed() => match changed {
                Some(Some(s)) => printer.emit(&WatchEvent::CommandStatus(&s))?,
                // Cleared by a device switch.
                Some(None) => {}
                None => break,
            },
            changed = presence.changed() => match changed {
                Some(Some(p)) => printer.emit(&WatchEvent::Presence(&p))?,
                Some(None) => {}
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                printer.emit(&WatchEvent::Connection { state: describe(&current) })?;
                if current == SessionState::Failed {
                    return Err(CliError::ConnectionFailed {
                        reason: "reconnect attempts exhausted".into(),
                    });
                }
            }
            err = errors.recv() => match err {
                Ok(e) => warn!(error = %e, "channel error"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "channel errors dropped"),
                Err(RecvError::Closed) => break,
            },
            () = tick(&mut rotation) => {
                if let Some(device) = order.next() {
                    channel.subscribe_device(device.clone());
                    printer.emit(&WatchEvent::Bound { device: device.as_str() })?;
                }
            }
        }
    }
    Ok(())
}
