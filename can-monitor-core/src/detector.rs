//! Bit rate auto-detection
//!
//! The detector opens the channel at each candidate bit rate in turn and
//! listens for traffic. The first rate that delivers the required number of
//! frames within the detection window wins; its handle is handed back to the
//! caller still open so the connection can go live without a second open.
//!
//! Candidates are tried in the configured order, slowest first by default.
//! A failed attempt of any kind (open error, silence, read error) only moves
//! the scan on to the next candidate. A run always starts from the first
//! candidate; there is no resuming a previous partial scan.

use crate::config::MonitorConfig;
use crate::source::{FrameChannel, FrameSource};
use crate::types::{Bitrate, ConnectError, ReadError};
use std::fmt;
use std::time::{Duration, Instant};

/// Result of a single candidate attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Enough frames arrived; this is the detected rate
    Traffic { frames: usize },
    /// Opened fine but the window passed without enough frames
    NoTraffic { frames: usize },
    OpenFailed(ConnectError),
    ReadFailed(ReadError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Traffic { .. })
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Traffic { frames } => write!(f, "traffic ({} frames)", frames),
            AttemptOutcome::NoTraffic { frames } => write!(f, "no traffic ({} frames)", frames),
            AttemptOutcome::OpenFailed(e) => write!(f, "open failed: {}", e),
            AttemptOutcome::ReadFailed(e) => write!(f, "read failed: {}", e),
        }
    }
}

/// One entry in the attempt log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionAttempt {
    pub bitrate: Bitrate,
    pub outcome: AttemptOutcome,
}

/// Overall outcome of a detection run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    Success(Bitrate),
    Failure,
}

/// Outcome plus the ordered attempt log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub outcome: DetectionOutcome,
    pub attempts: Vec<DetectionAttempt>,
}

impl DetectionResult {
    /// Detected bit rate, if any
    pub fn bitrate(&self) -> Option<Bitrate> {
        match self.outcome {
            DetectionOutcome::Success(bitrate) => Some(bitrate),
            DetectionOutcome::Failure => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.bitrate().is_some()
    }
}

/// A finished run: the result and, on success, the still-open handle
pub struct Detection {
    pub result: DetectionResult,
    pub handle: Option<Box<dyn FrameChannel>>,
}

type ProgressCallback = Box<dyn Fn(Bitrate) + Send + Sync>;

/// Sequential trial-connection bit rate detector
pub struct BaudDetector {
    candidates: Vec<Bitrate>,
    window: Duration,
    frames_required: usize,
    progress: Option<ProgressCallback>,
}

impl BaudDetector {
    /// Create a detector from the monitor configuration
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            candidates: config.candidate_bitrates.clone(),
            window: config.detection_timeout(),
            frames_required: config.frames_required.max(1),
            progress: None,
        }
    }

    /// Builder method: report each bit rate before it is tried
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bitrate) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn candidates(&self) -> &[Bitrate] {
        &self.candidates
    }

    /// Scan all candidates on `channel`
    ///
    /// Every handle except the winning one is closed before this returns.
    pub fn detect(&self, source: &dyn FrameSource, channel: &str) -> Detection {
        log::info!(
            "Detecting bit rate on {} (candidates: {:?})",
            channel,
            self.candidates.iter().map(|b| b.bps()).collect::<Vec<_>>()
        );

        let mut attempts = Vec::with_capacity(self.candidates.len());

        for &bitrate in &self.candidates {
            if let Some(progress) = &self.progress {
                progress(bitrate);
            }

            let (outcome, handle) = self.try_bitrate(source, channel, bitrate);
            log::debug!("Bit rate {} on {}: {}", bitrate, channel, outcome);
            attempts.push(DetectionAttempt { bitrate, outcome });

            if let Some(handle) = handle {
                log::info!("Detected bit rate {} on {}", bitrate, channel);
                return Detection {
                    result: DetectionResult {
                        outcome: DetectionOutcome::Success(bitrate),
                        attempts,
                    },
                    handle: Some(handle),
                };
            }
        }

        log::warn!(
            "Bit rate detection failed on {} after {} attempts",
            channel,
            attempts.len()
        );
        Detection {
            result: DetectionResult {
                outcome: DetectionOutcome::Failure,
                attempts,
            },
            handle: None,
        }
    }

    /// Try one bit rate; the handle is returned only on success
    fn try_bitrate(
        &self,
        source: &dyn FrameSource,
        channel: &str,
        bitrate: Bitrate,
    ) -> (AttemptOutcome, Option<Box<dyn FrameChannel>>) {
        let mut handle = match source.open(channel, bitrate) {
            Ok(handle) => handle,
            Err(e) => return (AttemptOutcome::OpenFailed(e), None),
        };

        let deadline = Instant::now() + self.window;
        let mut frames = 0;

        let outcome = loop {
            if frames >= self.frames_required {
                break AttemptOutcome::Traffic { frames };
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break AttemptOutcome::NoTraffic { frames };
            }

            match handle.next_frame(remaining) {
                Ok(frame) => {
                    log::trace!("Detection frame at {}: {}", bitrate, frame);
                    frames += 1;
                }
                Err(ReadError::Timeout) => break AttemptOutcome::NoTraffic { frames },
                Err(e) => break AttemptOutcome::ReadFailed(e),
            }
        };

        if outcome.is_success() {
            (outcome, Some(handle))
        } else {
            handle.close();
            (outcome, None)
        }
    }
}
