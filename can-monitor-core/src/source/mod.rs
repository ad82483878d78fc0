//! Driver boundary (FrameSource)
//!
//! The monitor never talks to the vendor driver directly. Everything it needs
//! is expressed by two traits: [`FrameSource`] opens a channel at a bit rate,
//! and the returned [`FrameChannel`] handle yields frames one bounded read at
//! a time.

use crate::types::{Bitrate, ConnectError, Frame, ReadError};
use std::time::Duration;

pub mod candump;
pub mod simulated;

pub use candump::{load_candump, parse_candump, ReplayError, ReplayFrame};
pub use simulated::SimulatedBus;

/// Interface driver that can open channels at a given bit rate
pub trait FrameSource: Send + Sync {
    /// Open `channel` at `bitrate`
    fn open(&self, channel: &str, bitrate: Bitrate) -> Result<Box<dyn FrameChannel>, ConnectError>;
}

/// An open channel handle
///
/// Handles are owned by exactly one reader at a time. `close` must be safe to
/// call more than once and must never fail observably.
pub trait FrameChannel: Send {
    /// Wait at most `timeout` for the next frame
    fn next_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError>;

    /// Release the underlying channel
    fn close(&mut self);

    /// Channel name this handle was opened on
    fn channel(&self) -> &str;

    /// Bit rate this handle was opened at
    fn bitrate(&self) -> Bitrate;
}

/// Find the channels that can currently be opened
///
/// Each candidate is opened at `bitrate` and closed again straight away.
/// Channels that fail to open for any reason are skipped.
pub fn probe_channels<S>(source: &S, candidates: &[String], bitrate: Bitrate) -> Vec<String>
where
    S: FrameSource + ?Sized,
{
    let mut available = Vec::new();

    for channel in candidates {
        match source.open(channel, bitrate) {
            Ok(mut handle) => {
                handle.close();
                available.push(channel.clone());
            }
            Err(e) => log::trace!("Channel {} not available: {}", channel, e),
        }
    }

    log::debug!("Probed {} channels, {} available", candidates.len(), available.len());
    available
}

/// Default PCAN-USB channel names (`PCAN_USBBUS1` .. `PCAN_USBBUS8`)
pub fn default_channel_names() -> Vec<String> {
    (1..=8).map(|i| format!("PCAN_USBBUS{}", i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_channels() {
        let bus = SimulatedBus::new(Bitrate::K500)
            .with_channels(vec!["PCAN_USBBUS1".to_string(), "PCAN_USBBUS3".to_string()]);

        let found = probe_channels(&bus, &default_channel_names(), Bitrate::K500);
        assert_eq!(found, vec!["PCAN_USBBUS1", "PCAN_USBBUS3"]);
        // Probing must not leave anything open
        assert_eq!(bus.open_handles(), 0);
    }

    #[test]
    fn test_probe_skips_busy_channel() {
        let bus = SimulatedBus::new(Bitrate::K500);
        let _held = bus.open("PCAN_USBBUS1", Bitrate::K500).unwrap();

        let found = probe_channels(&bus, &default_channel_names(), Bitrate::K500);
        assert!(found.is_empty());
    }
}
