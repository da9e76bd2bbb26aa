//! Capture session management.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::OutputChunk;
use crate::mixer::SyncMixer;
use crate::pipeline::DriverCommand;

/// Statistics about a capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Wire messages delivered by all producer channels.
    pub messages_received: u64,
    /// Frames mixed into the window.
    pub frames_mixed: u64,
    /// Chunks dropped because they fell outside the window.
    pub overruns: u64,
    /// Messages dropped because they could not be decoded.
    pub malformed: u64,
    /// Segments popped from the mixer.
    pub segments_output: u64,
    /// Popped segments at least one sink never accepted.
    pub segments_undelivered: u64,
    /// Producers currently attached.
    pub producers: u64,
}

/// Counters shared between the session handle, the driver task and every
/// producer's delivery task.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub messages_received: AtomicU64,
    pub malformed: AtomicU64,
    pub segments_output: AtomicU64,
    pub segments_undelivered: AtomicU64,
    pub producers: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            messages_received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            segments_output: AtomicU64::new(0),
            segments_undelivered: AtomicU64::new(0),
            producers: AtomicU64::new(0),
        }
    }

    /// Snapshot combined with the mixer's own counters.
    pub fn snapshot(&self, mixer: &SyncMixer) -> SessionStats {
        SessionStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            frames_mixed: mixer.frames_mixed(),
            overruns: mixer.overruns(),
            malformed: self.malformed.load(Ordering::Relaxed),
            segments_output: self.segments_output.load(Ordering::Relaxed),
            segments_undelivered: self.segments_undelivered.load(Ordering::Relaxed),
            producers: self.producers.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running capture session.
///
/// Returned by [`AppAudioCaptureBuilder::start()`]. A background task pops the
/// mixer into the sinks and keeps producers attached to the target until
/// [`stop()`](CaptureSession::stop) is called or the handle is dropped.
///
/// # Lifecycle
///
/// 1. Created by [`AppAudioCaptureBuilder::start()`]
/// 2. Producers attach and detach as the target's processes come and go
/// 3. Call [`stop()`](CaptureSession::stop) for graceful shutdown
/// 4. Dropping the handle also stops capture (but prefer explicit `stop()`)
///
/// # Example
///
/// ```ignore
/// let session = AppAudioCapture::builder()
///     .target("game.exe")
///     .discovery(discovery)
///     .add_sink(ChannelSink::new(tx))
///     .start()
///     .await?;
///
/// tokio::time::sleep(Duration::from_secs(10)).await;
/// println!("{:?}", session.stats());
/// session.stop().await;
/// ```
///
/// [`AppAudioCaptureBuilder::start()`]: crate::AppAudioCaptureBuilder::start
pub struct CaptureSession {
    state: Arc<SessionState>,
    mixer: Arc<SyncMixer>,
    cmd_tx: mpsc::Sender<DriverCommand>,
    driver_handle: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub(crate) fn new(
        state: Arc<SessionState>,
        mixer: Arc<SyncMixer>,
        cmd_tx: mpsc::Sender<DriverCommand>,
        driver_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            state,
            mixer,
            cmd_tx,
            driver_handle: Some(driver_handle),
        }
    }

    /// Returns `true` until the session is stopped.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.snapshot(&self.mixer)
    }

    /// The mixer every producer feeds.
    pub fn mixer(&self) -> &Arc<SyncMixer> {
        &self.mixer
    }

    /// Whether a segment is due, for consumers that poll instead of using sinks.
    ///
    /// The session's own task pops segments as soon as they are due, so
    /// polling competes with the sinks for output.
    pub fn has_data_ready(&self) -> bool {
        self.mixer.ready_to_pop()
    }

    /// Pops the next segment if one is due.
    pub fn pop(&self) -> Option<OutputChunk> {
        if !self.mixer.ready_to_pop() {
            return None;
        }
        self.state.segments_output.fetch_add(1, Ordering::Relaxed);
        Some(self.mixer.pop())
    }

    /// Resizes the mixer window, discarding buffered audio.
    pub fn set_buffer_duration(&self, duration: Duration) {
        tracing::info!(buffer_ms = duration.as_millis() as u64, "Buffer duration changed");
        self.mixer.resize(SyncMixer::frames_for_duration(duration));
    }

    /// Switches capture to another target application.
    ///
    /// Producers of the previous target are detached on the next update.
    pub async fn set_target(&self, name: impl Into<String>) {
        let _ = self.cmd_tx.send(DriverCommand::SetTarget(name.into())).await;
    }

    /// Gracefully stops the session.
    ///
    /// This will:
    /// 1. Stop the driver task
    /// 2. Stop every producer receiver (removing their endpoints)
    /// 3. Call `on_stop()` on all sinks
    pub async fn stop(mut self) {
        self.stop_internal().await;
    }

    async fn stop_internal(&mut self) {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.cmd_tx.send(DriverCommand::Stop).await;

        if let Some(handle) = self.driver_handle.take() {
            let _ = handle.await;
        }
        tracing::info!("Capture session stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            // Dropped without stop(); the driver cleans up in the background
            let _ = self.cmd_tx.try_send(DriverCommand::Stop);
        }
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
