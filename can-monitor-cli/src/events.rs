//! Console event stream
//!
//! Wires supervisor and matcher notifications to timestamped console lines,
//! the textual stand-in for the status indicator and signal LEDs.

use can_monitor_core::{Bitrate, ConnectionStatus, ConnectionSupervisor, RuleChange, SignalMatcher};
use chrono::Local;

/// Wall-clock prefix in `HH:MM:SS.mmm`
pub fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

pub fn status_line(status: &ConnectionStatus) -> String {
    let marker = match status {
        ConnectionStatus::Connected { .. } => "●",
        ConnectionStatus::Offline => "○",
        ConnectionStatus::Detecting(_) => "…",
        ConnectionStatus::Disconnected => "·",
    };
    format!("{} | {} Status: {}", timestamp(), marker, status)
}

pub fn signal_line(change: &RuleChange) -> String {
    let led = if change.matched { "🟢" } else { "⚪" };
    format!("{} | {} {}", timestamp(), led, change.name)
}

pub fn progress_line(bitrate: Bitrate) -> String {
    format!("{} | Testing baud rate: {} bps...", timestamp(), bitrate.bps())
}

/// Print status transitions and signal flips as they happen
pub fn attach(supervisor: &ConnectionSupervisor, matcher: &SignalMatcher, quiet: bool) {
    supervisor.on_status_change(move |status| {
        if !quiet {
            println!("{}", status_line(status));
        }
    });
    matcher.on_change(move |change| {
        if !quiet {
            println!("{}", signal_line(change));
        }
    });
}
