//! In-process simulated CAN interface
//!
//! `SimulatedBus` stands in for the vendor driver in tests and in the CLI's
//! replay mode. It models the parts of a real interface the monitor depends
//! on: a bus that only produces traffic at its live bit rate, one open handle
//! per channel, and the device being unplugged while a read is in progress.

use super::{FrameChannel, FrameSource};
use crate::types::{Bitrate, ConnectError, Frame, FrameError, ReadError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Simulated interface with a shared frame queue
pub struct SimulatedBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    state: Mutex<BusState>,
    wakeup: Condvar,
}

struct BusState {
    /// Bit rate the bus is actually running at (None = no traffic at all)
    live_bitrate: Option<Bitrate>,
    channels: Vec<String>,
    attached: bool,
    /// Bumped on every unplug so old handles notice
    plug_generation: u64,
    open: HashSet<String>,
    queue: VecDeque<Frame>,
    open_failures: HashMap<Bitrate, ConnectError>,
    open_log: Vec<(String, Bitrate)>,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimulatedBus {
    /// Create a bus with traffic at `bitrate` on channel `PCAN_USBBUS1`
    pub fn new(bitrate: Bitrate) -> Self {
        Self::build(Some(bitrate))
    }

    /// Create a bus on which no bit rate ever produces traffic
    pub fn silent() -> Self {
        Self::build(None)
    }

    fn build(live_bitrate: Option<Bitrate>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState {
                    live_bitrate,
                    channels: vec!["PCAN_USBBUS1".to_string()],
                    attached: true,
                    plug_generation: 0,
                    open: HashSet::new(),
                    queue: VecDeque::new(),
                    open_failures: HashMap::new(),
                    open_log: Vec::new(),
                }),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Builder method: replace the set of channels the device exposes
    pub fn with_channels(self, channels: Vec<String>) -> Self {
        self.inner.lock().channels = channels;
        self
    }

    /// Builder method: make every open at `bitrate` fail with `error`
    pub fn with_open_failure(self, bitrate: Bitrate, error: ConnectError) -> Self {
        self.inner.lock().open_failures.insert(bitrate, error);
        self
    }

    /// Change the bit rate the bus runs at
    pub fn set_live_bitrate(&self, bitrate: Option<Bitrate>) {
        self.inner.lock().live_bitrate = bitrate;
        self.inner.wakeup.notify_all();
    }

    /// Queue a frame for delivery to whichever handle reads next
    pub fn push_frame(&self, id: u32, data: &[u8]) -> Result<(), FrameError> {
        self.push(Frame::new(id, data)?);
        Ok(())
    }

    /// Queue an already built frame; it is restamped when read
    pub fn push(&self, frame: Frame) {
        self.inner.lock().queue.push_back(frame);
        self.inner.wakeup.notify_all();
    }

    /// Simulate pulling the USB cable
    ///
    /// Reads on existing handles fail with `DeviceDisconnected` and new opens
    /// fail with `DeviceNotFound` until [`replug`](Self::replug) is called.
    pub fn unplug(&self) {
        let mut state = self.inner.lock();
        state.attached = false;
        state.plug_generation += 1;
        drop(state);
        self.inner.wakeup.notify_all();
        log::debug!("Simulated device unplugged");
    }

    /// Reattach the device
    pub fn replug(&self) {
        self.inner.lock().attached = true;
        self.inner.wakeup.notify_all();
        log::debug!("Simulated device replugged");
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.inner.lock().open.len()
    }

    /// Every successful open so far, in order
    pub fn open_log(&self) -> Vec<(String, Bitrate)> {
        self.inner.lock().open_log.clone()
    }

    /// Frames still waiting to be read
    pub fn queued_frames(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl FrameSource for SimulatedBus {
    fn open(&self, channel: &str, bitrate: Bitrate) -> Result<Box<dyn FrameChannel>, ConnectError> {
        let mut state = self.inner.lock();

        if !state.attached || !state.channels.iter().any(|c| c == channel) {
            return Err(ConnectError::DeviceNotFound(channel.to_string()));
        }
        if let Some(error) = state.open_failures.get(&bitrate) {
            return Err(error.clone());
        }
        if !state.open.insert(channel.to_string()) {
            return Err(ConnectError::AlreadyOpen(channel.to_string()));
        }
        state.open_log.push((channel.to_string(), bitrate));

        Ok(Box::new(SimulatedChannel {
            bus: Arc::clone(&self.inner),
            channel: channel.to_string(),
            bitrate,
            plug_generation: state.plug_generation,
            closed: false,
        }))
    }
}

struct SimulatedChannel {
    bus: Arc<BusInner>,
    channel: String,
    bitrate: Bitrate,
    plug_generation: u64,
    closed: bool,
}

impl FrameChannel for SimulatedChannel {
    fn next_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.bus.lock();

        loop {
            if self.closed || state.plug_generation != self.plug_generation || !state.attached {
                return Err(ReadError::DeviceDisconnected);
            }

            if state.live_bitrate == Some(self.bitrate) {
                if let Some(mut frame) = state.queue.pop_front() {
                    frame.timestamp = Instant::now();
                    return Ok(frame);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReadError::Timeout);
            }

            state = self
                .bus
                .wakeup
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.bus.lock().open.remove(&self.channel);
        self.bus.wakeup.notify_all();
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn bitrate(&self) -> Bitrate {
        self.bitrate
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        self.close();
    }
}
