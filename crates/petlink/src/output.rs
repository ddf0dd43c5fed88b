//! Output formatting: table, JSON, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use petlink_core::{CommandState, CommandStatus, PresenceEvent};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Command state label, colored by outcome.
pub fn paint_state(state: &CommandState, color: bool) -> String {
    let label = state.as_str();
    if !color {
        return label.to_owned();
    }
    match state {
        CommandState::Acked => label.green().to_string(),
        CommandState::Failed | CommandState::Timeout => label.red().to_string(),
        _ => label.yellow().to_string(),
    }
}

pub fn paint_presence(online: bool, color: bool) -> String {
    let label = if online { "online" } else { "offline" };
    match (color, online) {
        (false, _) => label.to_owned(),
        (true, true) => label.green().to_string(),
        (true, false) => label.dimmed().to_string(),
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Request")]
    pub req_id: String,
    #[tabled(rename = "Device")]
    pub device: String,
    #[tabled(rename = "Type")]
    pub command_type: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Created")]
    pub created: String,
    #[tabled(rename = "Acked")]
    pub acked: String,
    #[tabled(rename = "Error")]
    pub error: String,
}

impl StatusRow {
    pub fn new(status: &CommandStatus, color: bool) -> Self {
        Self {
            req_id: status.req_id.clone(),
            device: status.device_id.clone(),
            command_type: status.command_type.clone(),
            status: paint_state(&status.status, color),
            created: status.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            acked: status
                .ack_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
            error: status.error.clone().unwrap_or_default(),
        }
    }
}

/// One line of `watch` output.
pub fn status_line(status: &CommandStatus, color: bool) -> String {
    let mut line = format!(
        "{}  command  {}  {} {} {}",
        timestamp(),
        status.device_id,
        status.req_id,
        status.command_type,
        paint_state(&status.status, color),
    );
    if let Some(ref error) = status.error {
        line.push_str("  ");
        line.push_str(error);
    }
    line
}

pub fn presence_line(event: &PresenceEvent, color: bool) -> String {
    format!(
        "{}  presence {}  {}",
        timestamp(),
        event.device_id,
        paint_presence(event.online, color),
    )
}

/// Connection and binding notices.
pub fn notice_line(message: &str, color: bool) -> String {
    if color {
        format!("{}  {}", timestamp(), message.cyan())
    } else {
        format!("{}  {message}", timestamp())
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`; plain uses `id_fn`.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Render a command status in the chosen format.
pub fn render_status(
    format: OutputFormat,
    status: &CommandStatus,
    color: bool,
) -> Result<String, CliError> {
    render_single(
        format,
        status,
        |s| render_table(&[StatusRow::new(s, color)]),
        |s| s.req_id.clone(),
    )
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn render_json<T: serde::Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    let out = if compact {
        serde_json::to_string(data)?
    } else {
        serde_json::to_string_pretty(data)?
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: &str) -> CommandStatus {
        serde_json::from_value(serde_json::json!({
            "reqId": "r-1",
            "deviceId": "D1",
            "type": "feed",
            "status": state,
            "createdAt": "2024-01-01T00:00:00Z",
            "error": "jammed"
        }))
        .unwrap()
    }

    #[test]
    fn plain_prints_request_id() {
        let out = render_status(OutputFormat::Plain, &status("ACKED"), false).unwrap();
        assert_eq!(out, "r-1");
    }

    #[test]
    fn compact_json_is_single_line() {
        let out = render_status(OutputFormat::JsonCompact, &status("FAILED"), false).unwrap();
        assert!(!out.contains('\n'));
        assert!(out.contains(r#""status":"FAILED""#));
    }

    #[test]
    fn table_has_status_column() {
        let out = render_status(OutputFormat::Table, &status("PENDING"), false).unwrap();
        assert!(out.contains("Status"));
        assert!(out.contains("PENDING"));
        assert!(out.contains("jammed"));
    }

    #[test]
    fn uncolored_labels_are_plain() {
        assert_eq!(paint_state(&CommandState::Timeout, false), "TIMEOUT");
        assert_eq!(paint_presence(false, false), "offline");
    }
}
