//! Connection supervisor
//!
//! Owns the connection state machine:
//!
//! ```text
//! Disconnected ──start_detection──▶ Detecting ──success──▶ Connected(bitrate, channel)
//!                                      │                      │   │
//!                                      ▼ exhausted            │   └─reconfigure──▶ Detecting
//!                               Detecting(Failed)             │
//!                                │          │                 ├─device lost──▶ Offline
//!                   retry_detection   continue_offline        └─go_offline───▶ Offline
//!                                │          ▼
//!                                └─▶    Offline ──reconnect / start_detection──▶ Detecting
//! ```
//!
//! While connected, a background worker thread owns the open handle, reads
//! frames with a bounded timeout and feeds them to the shared
//! [`SignalMatcher`] in arrival order. Stopping the worker sets a flag and
//! joins the thread; the worker closes the handle itself once its last read
//! has returned, so a handle is never closed underneath an in-flight read.
//!
//! Status is published synchronously: observers registered with
//! [`on_status_change`](ConnectionSupervisor::on_status_change) have seen the
//! new status before the triggering call returns.

use crate::config::MonitorConfig;
use crate::detector::{BaudDetector, DetectionResult};
use crate::matcher::SignalMatcher;
use crate::source::{FrameChannel, FrameSource};
use crate::types::{Bitrate, ReadError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where a detection run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPhase {
    InProgress,
    /// All candidates failed; waiting for retry or offline
    Failed,
}

/// Connection state as seen by the rest of the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Detecting(DetectionPhase),
    Connected { bitrate: Bitrate, channel: String },
    Offline,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectionStatus::Offline)
    }

    pub fn is_detection_failed(&self) -> bool {
        matches!(self, ConnectionStatus::Detecting(DetectionPhase::Failed))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Detecting(DetectionPhase::InProgress) => write!(f, "detecting"),
            ConnectionStatus::Detecting(DetectionPhase::Failed) => write!(f, "detection failed"),
            ConnectionStatus::Connected { bitrate, channel } => {
                write!(f, "connected to {} at {}", channel, bitrate)
            }
            ConnectionStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Errors returned by supervisor operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("Cannot {operation} while {from}")]
    InvalidTransition {
        operation: &'static str,
        from: ConnectionStatus,
    },
}

type StatusObserver = Box<dyn Fn(&ConnectionStatus) + Send + Sync>;

/// Single-writer status cell with synchronous notification
struct StatusBoard {
    current: RwLock<ConnectionStatus>,
    /// Also serialises publishes so observers see transitions in order
    observers: Mutex<Vec<StatusObserver>>,
}

impl StatusBoard {
    fn new() -> Self {
        Self {
            current: RwLock::new(ConnectionStatus::Disconnected),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<StatusObserver>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> ConnectionStatus {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, status: ConnectionStatus) {
        self.publish_if(|_| true, status);
    }

    /// Publish `status` only if `condition` holds for the current status
    fn publish_if<F>(&self, condition: F, status: ConnectionStatus) -> bool
    where
        F: FnOnce(&ConnectionStatus) -> bool,
    {
        let observers = self.observers();
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if !condition(&current) {
                return false;
            }
            log::info!("Connection status: {} -> {}", *current, status);
            *current = status.clone();
        }
        for observer in observers.iter() {
            observer(&status);
        }
        true
    }
}

/// Read-only view of the connection status, cheap to clone across threads
#[derive(Clone)]
pub struct StatusHandle {
    board: Arc<StatusBoard>,
}

impl StatusHandle {
    pub fn status(&self) -> ConnectionStatus {
        self.board.get()
    }
}

struct MonitorWorker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Owns detection, the live handle and the connection status
pub struct ConnectionSupervisor {
    source: Arc<dyn FrameSource>,
    config: MonitorConfig,
    detector: BaudDetector,
    matcher: Arc<SignalMatcher>,
    board: Arc<StatusBoard>,
    channel: Option<String>,
    worker: Option<MonitorWorker>,
    last_detection: Option<DetectionResult>,
}

impl ConnectionSupervisor {
    /// Create a supervisor in the `Disconnected` state
    pub fn new(source: Arc<dyn FrameSource>, matcher: Arc<SignalMatcher>, config: MonitorConfig) -> Self {
        Self {
            source,
            detector: BaudDetector::new(&config),
            config,
            matcher,
            board: Arc::new(StatusBoard::new()),
            channel: None,
            worker: None,
            last_detection: None,
        }
    }

    /// Builder method: report each bit rate as detection tries it
    pub fn with_detection_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Bitrate) + Send + Sync + 'static,
    {
        self.detector = BaudDetector::new(&self.config).with_progress(callback);
        self
    }

    /// Register a status observer
    ///
    /// Observers run on whichever thread made the transition. They must not
    /// register further observers.
    pub fn on_status_change<F>(&self, observer: F)
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.board.observers().push(Box::new(observer));
    }

    pub fn status(&self) -> ConnectionStatus {
        self.board.get()
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            board: Arc::clone(&self.board),
        }
    }

    pub fn matcher(&self) -> Arc<SignalMatcher> {
        Arc::clone(&self.matcher)
    }

    /// Channel used by the most recent detection run
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn last_detection(&self) -> Option<&DetectionResult> {
        self.last_detection.as_ref()
    }

    /// Detect the bit rate on `channel` and go live on success
    ///
    /// Valid from `Disconnected` and `Offline`. On failure the supervisor
    /// stays in `Detecting(Failed)` until [`retry_detection`](Self::retry_detection)
    /// or [`continue_offline`](Self::continue_offline) is called.
    pub fn start_detection(&mut self, channel: &str) -> Result<DetectionResult, SupervisorError> {
        let status = self.refresh();
        match status {
            ConnectionStatus::Disconnected | ConnectionStatus::Offline => {}
            other => return Err(invalid("start detection", other)),
        }
        Ok(self.run_detection(channel))
    }

    /// Run detection again from the first candidate
    pub fn retry_detection(&mut self) -> Result<DetectionResult, SupervisorError> {
        let status = self.refresh();
        if !status.is_detection_failed() {
            return Err(invalid("retry detection", status));
        }
        let Some(channel) = self.channel.clone() else {
            return Err(invalid("retry detection", status));
        };
        Ok(self.run_detection(&channel))
    }

    /// Give up on detection and work without a bus
    pub fn continue_offline(&mut self) -> Result<(), SupervisorError> {
        let status = self.refresh();
        if !status.is_detection_failed() {
            return Err(invalid("continue offline", status));
        }
        self.board.publish(ConnectionStatus::Offline);
        Ok(())
    }

    /// Drop the current connection (if any) and detect again on the same channel
    ///
    /// Valid from `Connected` and `Offline`.
    pub fn reconnect(&mut self) -> Result<DetectionResult, SupervisorError> {
        let status = self.refresh();
        if !(status.is_connected() || status.is_offline()) {
            return Err(invalid("reconnect", status));
        }
        let Some(channel) = self.channel.clone() else {
            return Err(invalid("reconnect", status));
        };

        self.stop_worker();
        Ok(self.run_detection(&channel))
    }

    /// Close the live connection and detect on `channel`
    pub fn reconfigure(&mut self, channel: &str) -> Result<DetectionResult, SupervisorError> {
        let status = self.refresh();
        if !status.is_connected() {
            return Err(invalid("reconfigure the connection", status));
        }

        self.stop_worker();
        Ok(self.run_detection(channel))
    }

    /// Close the live connection and keep the last match state
    pub fn go_offline(&mut self) -> Result<(), SupervisorError> {
        let status = self.refresh();
        if !status.is_connected() {
            return Err(invalid("go offline", status));
        }

        self.stop_worker();
        self.board.publish(ConnectionStatus::Offline);
        Ok(())
    }

    /// Stop monitoring, release the channel and return to `Disconnected`
    pub fn shutdown(&mut self) {
        self.stop_worker();
        if self.status() != ConnectionStatus::Disconnected {
            self.board.publish(ConnectionStatus::Disconnected);
        }
    }

    /// Reap a worker that exited on its own and return the current status
    fn refresh(&mut self) -> ConnectionStatus {
        if self.worker.as_ref().is_some_and(|w| w.thread.is_finished()) {
            self.stop_worker();
        }
        self.status()
    }

    fn run_detection(&mut self, channel: &str) -> DetectionResult {
        self.channel = Some(channel.to_string());
        self.board
            .publish(ConnectionStatus::Detecting(DetectionPhase::InProgress));

        let detection = self.detector.detect(self.source.as_ref(), channel);
        self.last_detection = Some(detection.result.clone());

        match (detection.handle, detection.result.bitrate()) {
            (Some(handle), Some(bitrate)) => {
                self.board.publish(ConnectionStatus::Connected {
                    bitrate,
                    channel: channel.to_string(),
                });
                self.spawn_worker(handle);
            }
            (Some(mut handle), None) => {
                handle.close();
                self.board
                    .publish(ConnectionStatus::Detecting(DetectionPhase::Failed));
            }
            (None, _) => {
                self.board
                    .publish(ConnectionStatus::Detecting(DetectionPhase::Failed));
            }
        }

        detection.result
    }

    fn spawn_worker(&mut self, handle: Box<dyn FrameChannel>) {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let matcher = Arc::clone(&self.matcher);
        let board = Arc::clone(&self.board);
        let read_timeout = self.config.read_timeout();

        let spawned = thread::Builder::new()
            .name("can-monitor".to_string())
            .spawn(move || monitor_loop(handle, matcher, board, worker_stop, read_timeout));

        match spawned {
            Ok(thread) => self.worker = Some(MonitorWorker { stop, thread }),
            Err(e) => {
                log::error!("Failed to start monitoring thread: {}", e);
                self.board.publish(ConnectionStatus::Offline);
            }
        }
    }

    /// Signal the worker and wait for it; bounded by one read timeout
    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Release);
            if worker.thread.join().is_err() {
                log::error!("Monitoring thread panicked");
            }
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn invalid(operation: &'static str, from: ConnectionStatus) -> SupervisorError {
    SupervisorError::InvalidTransition { operation, from }
}

/// Moves a still-connected status to `Offline` if the worker unwinds
struct UnwindGuard<'a> {
    board: &'a StatusBoard,
    stop: &'a AtomicBool,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::error!("Monitoring worker failed; going offline");
            self.board.publish_if(
                |current| current.is_connected() && !self.stop.load(Ordering::Acquire),
                ConnectionStatus::Offline,
            );
        }
    }
}

/// Worker body: read, evaluate, repeat until stopped or the device goes away
fn monitor_loop(
    mut handle: Box<dyn FrameChannel>,
    matcher: Arc<SignalMatcher>,
    board: Arc<StatusBoard>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
) {
    log::debug!(
        "Monitoring {} at {}",
        handle.channel(),
        handle.bitrate()
    );
    let _guard = UnwindGuard {
        board: &board,
        stop: &stop,
    };
    let mut frames: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        match handle.next_frame(read_timeout) {
            Ok(frame) => {
                log::trace!("{}", frame);
                matcher.evaluate(&frame);
                frames += 1;
            }
            Err(ReadError::Timeout) => continue,
            Err(ReadError::DeviceDisconnected) => {
                log::warn!(
                    "Device on {} disconnected after {} frames",
                    handle.channel(),
                    frames
                );
                handle.close();
                // A stop request means the supervisor is already moving elsewhere
                board.publish_if(
                    |current| current.is_connected() && !stop.load(Ordering::Acquire),
                    ConnectionStatus::Offline,
                );
                return;
            }
        }
    }

    log::debug!("Monitoring stopped on {} after {} frames", handle.channel(), frames);
    handle.close();
}
