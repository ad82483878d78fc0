//! End-of-run report
//!
//! Summarises the detection attempts and the final state of every signal.

use can_monitor_core::{ConnectionStatus, DetectionResult, MatcherSnapshot, MatcherStats};
use std::fmt::Write;

pub fn render(
    status: &ConnectionStatus,
    detection: Option<&DetectionResult>,
    snapshot: &MatcherSnapshot,
    stats: MatcherStats,
) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "═══════════════════════════════════════════════");
    let _ = writeln!(out, "  CAN Signal Monitor - Summary");
    let _ = writeln!(out, "═══════════════════════════════════════════════\n");
    let _ = writeln!(out, "Connection: {}", status);

    if let Some(detection) = detection {
        let _ = writeln!(out, "\n📡 Bit rate detection:");
        for attempt in &detection.attempts {
            let mark = if attempt.outcome.is_success() { "✓" } else { "✗" };
            let _ = writeln!(out, "  {} {:>10} bps  {}", mark, attempt.bitrate.bps(), attempt.outcome);
        }
    }

    let _ = writeln!(
        out,
        "\n📊 Signals ({} of {} matched, rule set #{}):",
        snapshot.matched_count(),
        snapshot.signals.len(),
        snapshot.generation
    );
    for signal in &snapshot.signals {
        let state = match (signal.state.matched, signal.state.last_updated) {
            (true, _) => "MATCHED",
            (false, Some(_)) => "unmatched",
            (false, None) if status.is_connected() => "no data",
            (false, None) => "unknown",
        };
        let _ = writeln!(out, "  {:<24} {:<10} {}", signal.rule.name, state, signal.rule.rule);
    }

    let _ = writeln!(
        out,
        "\nFrames: {} received, {} with configured IDs",
        stats.frames_evaluated, stats.frames_routed
    );
    out
}
