//! CAN Signal Monitor Library
//!
//! Connection management and signal matching for a CAN bus monitored through
//! a USB interface.
//!
//! # Architecture
//!
//! - [`source`] - the driver boundary: open a channel at a bit rate, read
//!   frames with a timeout, close. Ships a simulated bus and candump replay.
//! - [`detector`] - finds the bus bit rate by trying candidates in order.
//! - [`supervisor`] - the Disconnected / Detecting / Connected / Offline
//!   state machine and the background monitoring worker.
//! - [`rules`] and [`matcher`] - exact, range and bit match rules and the
//!   engine that keeps per-rule match state.
//! - [`catalog`] - loads named rule configurations from JSON.
//!
//! The library does NOT:
//! - Implement a CAN protocol stack (arbitration, bus-off recovery)
//! - Decode higher-layer payloads such as J1939
//! - Render anything; display layers read status and snapshots
//!
//! # Example Usage
//!
//! ```no_run
//! use can_monitor_core::{
//!     ConnectionSupervisor, MonitorConfig, RuleCatalog, SignalMatcher, SimulatedBus, Bitrate,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let catalog = RuleCatalog::load(Path::new("configurations.json")).unwrap();
//! let matcher = Arc::new(SignalMatcher::new());
//! matcher.load_rules(catalog.require("Engine").unwrap().rules.clone()).unwrap();
//!
//! let bus = Arc::new(SimulatedBus::new(Bitrate::K500));
//! let mut supervisor = ConnectionSupervisor::new(bus, matcher.clone(), MonitorConfig::new());
//! supervisor.on_status_change(|status| println!("Status: {}", status));
//!
//! let result = supervisor.start_detection("PCAN_USBBUS1").unwrap();
//! if !result.is_success() {
//!     supervisor.continue_offline().unwrap();
//! }
//!
//! for signal in matcher.snapshot().signals {
//!     println!("{}: {}", signal.rule.name, signal.state.matched);
//! }
//! ```

// Public modules
pub mod catalog;
pub mod config;
pub mod detector;
pub mod matcher;
pub mod rules;
pub mod source;
pub mod supervisor;
pub mod types;

// Re-export main types for convenience
pub use catalog::{Configuration, RuleCatalog};
pub use config::MonitorConfig;
pub use detector::{
    AttemptOutcome, BaudDetector, Detection, DetectionAttempt, DetectionOutcome, DetectionResult,
};
pub use matcher::{MatcherSnapshot, MatcherStats, RuleChange, RuleState, SignalMatcher, SignalStatus};
pub use rules::{MatchRule, SignalRule};
pub use source::{FrameChannel, FrameSource, SimulatedBus};
pub use supervisor::{
    ConnectionStatus, ConnectionSupervisor, DetectionPhase, StatusHandle, SupervisorError,
};
pub use types::{
    Bitrate, ConfigError, ConnectError, Frame, FrameError, MonitorError, ReadError, Result,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: a fresh matcher has no rules and a fresh supervisor is disconnected
        let matcher = std::sync::Arc::new(SignalMatcher::new());
        assert_eq!(matcher.rule_count(), 0);

        let bus = std::sync::Arc::new(SimulatedBus::silent());
        let supervisor = ConnectionSupervisor::new(bus, matcher, MonitorConfig::new());
        assert_eq!(supervisor.status(), ConnectionStatus::Disconnected);
    }
}
