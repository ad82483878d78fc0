//! Core types for the CAN signal monitor
//!
//! This module defines the fundamental values that flow through the monitor:
//! raw frames coming off the bus, bit rates, and the error types returned by
//! the driver boundary and the configuration layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Highest identifier representable by a standard (11-bit) frame
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest identifier representable by an extended (29-bit) frame
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Raw CAN frame as received from the interface
///
/// Frames are never mutated after reception; the matcher only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// CAN message ID (11-bit or 29-bit)
    pub id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Monotonic reception time
    pub timestamp: Instant,
}

impl Frame {
    /// Create a frame stamped with the current instant
    ///
    /// Identifiers above 0x7FF are flagged as extended.
    pub fn new(id: u32, data: &[u8]) -> std::result::Result<Self, FrameError> {
        Self::with_timestamp(id, data, Instant::now())
    }

    /// Create a frame with an explicit reception time
    pub fn with_timestamp(
        id: u32,
        data: &[u8],
        timestamp: Instant,
    ) -> std::result::Result<Self, FrameError> {
        if id > MAX_EXTENDED_ID {
            return Err(FrameError::IdOutOfRange(id));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::DataTooLong(data.len()));
        }

        Ok(Self {
            id,
            data: data.to_vec(),
            is_extended: id > MAX_STANDARD_ID,
            timestamp,
        })
    }

    /// Flag the identifier as 29-bit regardless of its value
    pub fn into_extended(mut self) -> Self {
        self.is_extended = true;
        self
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "0x{:08X} |", self.id)?;
        } else {
            write!(f, "0x{:03X}      |", self.id)?;
        }
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// CAN bus bit rate in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitrate(pub u32);

impl Bitrate {
    pub const K125: Bitrate = Bitrate(125_000);
    pub const K250: Bitrate = Bitrate(250_000);
    pub const K500: Bitrate = Bitrate(500_000);
    pub const K1000: Bitrate = Bitrate(1_000_000);

    /// Canonical detection order, slowest first
    pub const CANDIDATES: [Bitrate; 4] = [Self::K125, Self::K250, Self::K500, Self::K1000];

    /// Bits per second
    pub fn bps(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{} kbit/s", self.0 / 1000)
        } else {
            write!(f, "{} bit/s", self.0)
        }
    }
}

/// Frame construction failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("CAN ID 0x{0:X} exceeds the 29-bit range")]
    IdOutOfRange(u32),

    #[error("Frame carries {0} data bytes, at most 8 are allowed")]
    DataTooLong(usize),
}

/// Errors returned when opening a channel on the interface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Device not found on channel {0}")]
    DeviceNotFound(String),

    #[error("Driver error: {0}")]
    DriverError(String),

    #[error("Channel {0} is already open")]
    AlreadyOpen(String),
}

/// Errors returned when reading from an open channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// No frame within the timeout; the handle is still usable
    #[error("No frame received within the read timeout")]
    Timeout,

    /// The device went away; the handle must be closed
    #[error("Device disconnected")]
    DeviceDisconnected,
}

impl ReadError {
    /// True if the handle can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadError::DeviceDisconnected)
    }
}

/// Errors raised while loading rule configurations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid rule #{index} ({name}): {reason}")]
    InvalidRule {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("Configuration not found: {0}")]
    ConfigurationNotFound(String),

    #[error("Failed to parse rule catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for the library
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    #[error(transparent)]
    Replay(#[from] crate::source::ReplayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_extended_flag() {
        let standard = Frame::new(0x123, &[1, 2, 3]).unwrap();
        assert!(!standard.is_extended);
        assert_eq!(standard.dlc(), 3);

        let extended = Frame::new(0x18FEF100, &[]).unwrap();
        assert!(extended.is_extended);
    }

    #[test]
    fn test_frame_rejects_bad_input() {
        assert_eq!(
            Frame::new(0x2000_0000, &[0]),
            Err(FrameError::IdOutOfRange(0x2000_0000))
        );
        assert_eq!(
            Frame::new(0x100, &[0; 9]),
            Err(FrameError::DataTooLong(9))
        );
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::new(0x0AB, &[0xDE, 0xAD]).unwrap();
        assert_eq!(frame.to_string(), "0x0AB      | DE AD");
    }

    #[test]
    fn test_bitrate_display_and_order() {
        assert_eq!(Bitrate::K500.to_string(), "500 kbit/s");
        assert_eq!(Bitrate(33_333).to_string(), "33333 bit/s");
        assert!(Bitrate::CANDIDATES.windows(2).all(|w| w[0] < w[1]));
    }
}
