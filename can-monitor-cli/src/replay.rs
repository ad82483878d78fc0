//! Feeds a candump recording into the simulated bus

use can_monitor_core::source::ReplayFrame;
use can_monitor_core::SimulatedBus;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest pause honoured between two recorded frames
const MAX_GAP: Duration = Duration::from_secs(1);

/// Delay before `next` given the previous frame, when pacing
pub fn gap(previous: &ReplayFrame, next: &ReplayFrame) -> Duration {
    match (previous.timestamp, next.timestamp) {
        (Some(a), Some(b)) if b > a => Duration::from_secs_f64(b - a).min(MAX_GAP),
        _ => Duration::ZERO,
    }
}

/// Push `frames` onto the bus from a background thread
pub fn spawn_feeder(bus: Arc<SimulatedBus>, frames: Vec<ReplayFrame>, pace: bool) -> std::io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name("replay-feeder".to_string())
        .spawn(move || {
            let mut pushed = 0;
            let mut previous: Option<&ReplayFrame> = None;

            for frame in &frames {
                if pace {
                    if let Some(prev) = previous {
                        thread::sleep(gap(prev, frame));
                    }
                }
                match frame.to_frame() {
                    Ok(built) => {
                        bus.push(built);
                        pushed += 1;
                    }
                    Err(e) => log::warn!("Skipping replay frame 0x{:X}: {}", frame.id, e),
                }
                previous = Some(frame);
            }

            log::debug!("Replay finished: {} frames queued", pushed);
            pushed
        })
}
