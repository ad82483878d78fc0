//! Monitor configuration types
//!
//! This module defines the tunables of the connection layer: which bit rates
//! detection tries, how long each attempt listens, and how long a single read
//! may block while monitoring.

use crate::types::Bitrate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest detection window or read timeout accepted, in milliseconds
pub const MIN_TIMEOUT_MS: u64 = 1;

/// Configuration for bit rate detection and live monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Bit rates to try, in order (default: 125k, 250k, 500k, 1000k)
    #[serde(default = "default_candidates")]
    pub candidate_bitrates: Vec<Bitrate>,

    /// How long a single detection attempt listens for traffic (default: 2000ms)
    #[serde(default = "default_detection_timeout")]
    pub detection_timeout_ms: u64,

    /// Frames that must arrive within the window to accept a bit rate (default: 1)
    #[serde(default = "default_frames_required")]
    pub frames_required: usize,

    /// Upper bound on one blocking read while monitoring (default: 100ms)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_candidates() -> Vec<Bitrate> {
    Bitrate::CANDIDATES.to_vec()
}

fn default_detection_timeout() -> u64 {
    2000
}

fn default_frames_required() -> usize {
    1
}

fn default_read_timeout() -> u64 {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            candidate_bitrates: default_candidates(),
            detection_timeout_ms: default_detection_timeout(),
            frames_required: default_frames_required(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl MonitorConfig {
    /// Create a new monitor configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: replace the candidate bit rates
    pub fn with_candidates(mut self, bitrates: Vec<Bitrate>) -> Self {
        self.candidate_bitrates = bitrates;
        self
    }

    /// Builder method: set the per-attempt detection window
    pub fn with_detection_timeout(mut self, timeout: Duration) -> Self {
        self.detection_timeout_ms = (timeout.as_millis() as u64).max(MIN_TIMEOUT_MS);
        self
    }

    /// Builder method: set how many frames confirm a bit rate
    pub fn with_frames_required(mut self, frames: usize) -> Self {
        self.frames_required = frames.max(1);
        self
    }

    /// Builder method: set the monitoring read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = (timeout.as_millis() as u64).max(MIN_TIMEOUT_MS);
        self
    }

    /// Per-attempt detection window, never shorter than [`MIN_TIMEOUT_MS`]
    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms.max(MIN_TIMEOUT_MS))
    }

    /// Monitoring read timeout, never shorter than [`MIN_TIMEOUT_MS`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(MIN_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::new();
        assert_eq!(config.candidate_bitrates, Bitrate::CANDIDATES.to_vec());
        assert_eq!(config.detection_timeout(), Duration::from_secs(2));
        assert_eq!(config.frames_required, 1);
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder() {
        let config = MonitorConfig::new()
            .with_candidates(vec![Bitrate::K500, Bitrate::K250])
            .with_detection_timeout(Duration::from_millis(50))
            .with_frames_required(0)
            .with_read_timeout(Duration::from_millis(10));

        assert_eq!(config.candidate_bitrates, vec![Bitrate::K500, Bitrate::K250]);
        assert_eq!(config.detection_timeout_ms, 50);
        assert_eq!(config.frames_required, 1);
        assert_eq!(config.read_timeout_ms, 10);
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let built = MonitorConfig::new()
            .with_detection_timeout(Duration::ZERO)
            .with_read_timeout(Duration::ZERO);
        assert_eq!(built.detection_timeout_ms, MIN_TIMEOUT_MS);
        assert_eq!(built.read_timeout_ms, MIN_TIMEOUT_MS);

        let loaded: MonitorConfig =
            serde_json::from_str(r#"{ "detection_timeout_ms": 0, "read_timeout_ms": 0 }"#).unwrap();
        assert_eq!(loaded.detection_timeout(), Duration::from_millis(MIN_TIMEOUT_MS));
        assert_eq!(loaded.read_timeout(), Duration::from_millis(MIN_TIMEOUT_MS));
    }

    #[test]
    fn test_partial_deserialization() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{ "candidate_bitrates": [250000, 500000] }"#).unwrap();
        assert_eq!(config.candidate_bitrates, vec![Bitrate::K250, Bitrate::K500]);
        assert_eq!(config.detection_timeout_ms, 2000);
    }
}
