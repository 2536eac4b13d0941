//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table formatting and human-readable ages, port
//! lists, exit statuses and event lines.

use berth_common::types::{ContainerState, ExitCode, PortBinding};
use berth_runtime::container::ContainerSummary;
use berth_runtime::events::{EventDetail, LifecycleEvent};
use chrono::{DateTime, TimeDelta, Utc};

/// Formats an elapsed time coarsely (e.g., "3 minutes").
#[must_use]
pub fn format_age(elapsed: TimeDelta) -> String {
    let seconds = elapsed.num_seconds().max(0);
    let (value, unit) = match seconds {
        0..60 => (seconds, "second"),
        60..3600 => (seconds / 60, "minute"),
        3600..86_400 => (seconds / 3600, "hour"),
        _ => (seconds / 86_400, "day"),
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// Formats port bindings as `8080->80/tcp, 9000->9000/udp`.
#[must_use]
pub fn format_ports(bindings: &[PortBinding]) -> String {
    if bindings.is_empty() {
        return "-".into();
    }
    bindings
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Formats the state column, with the exit status for finished containers.
#[must_use]
pub fn format_status(summary: &ContainerSummary) -> String {
    match summary.exit_code {
        Some(ExitCode::Code(code)) => format!("{} ({code})", summary.state),
        Some(ExitCode::Unknown) => format!("{} (?)", summary.state),
        None => summary.state.to_string(),
    }
}

/// Renders a `ps` table.
#[must_use]
pub fn format_table(summaries: &[ContainerSummary], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<14} {:<16} {:<20} {:<14} {:<16} {}\n",
        "CONTAINER ID", "NAME", "IMAGE", "STATUS", "CREATED", "PORTS"
    );
    for s in summaries {
        out.push_str(&format!(
            "{:<14} {:<16} {:<20} {:<14} {:<16} {}\n",
            s.id.short(),
            s.name.as_deref().unwrap_or("-"),
            s.image_ref.to_string(),
            format_status(s),
            format!("{} ago", format_age(now - s.created_at)),
            format_ports(&s.port_bindings),
        ));
    }
    out
}

fn state_name(state: Option<ContainerState>) -> String {
    state.map_or_else(|| "-".to_string(), |s| s.to_string())
}

/// One line per lifecycle event, `docker events` style.
#[must_use]
pub fn format_event(event: &LifecycleEvent) -> String {
    let detail = match &event.detail {
        EventDetail::Created => "created".to_string(),
        EventDetail::Started { pid } => format!("started pid={pid}"),
        EventDetail::LaunchFailed { message } => format!("launch failed: {message}"),
        EventDetail::Stopped { exit_code } => format!("stopped exit={exit_code}"),
        EventDetail::TerminationTimeout {
            timeout_ms,
            exit_code,
        } => format!("killed after {timeout_ms}ms exit={exit_code}"),
        EventDetail::Exited { exit_code } => format!("exited exit={exit_code}"),
        EventDetail::Reconciled { reason } => format!("reconciled: {reason}"),
        EventDetail::Removing => "removing".to_string(),
        EventDetail::Removed => "removed".to_string(),
    };
    format!(
        "{} {} {} -> {} {detail}",
        event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        event.container_id.short(),
        state_name(event.from_state),
        state_name(event.to_state),
    )
}
