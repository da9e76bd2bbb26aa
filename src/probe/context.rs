//! Per-process capture state shared by every intercepted call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::region::WriteRegion;
use crate::clock::{Clock, SystemClock};
use crate::config::TransportConfig;
use crate::format::AudioFormat;
use crate::transport::TransportSender;
use crate::wire::split_commit;

/// Counters kept by the commit path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeStats {
    /// Commit calls observed.
    pub commits_seen: u64,
    /// Commits skipped because they carried no frames.
    pub zero_frame_skipped: u64,
    /// Chunks written to the channel.
    pub chunks_sent: u64,
    /// Chunks the channel did not take (no receiver, or retries exhausted).
    pub chunks_dropped: u64,
    /// Commits dropped whole before chunking: no format negotiated yet, or
    /// no buffer requested.
    pub commits_unreadable: u64,
    /// Commits dropped whole because they needed too many chunks.
    pub commits_too_large: u64,
}

#[derive(Default)]
struct Counters {
    commits_seen: AtomicU64,
    zero_frame_skipped: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_dropped: AtomicU64,
    commits_unreadable: AtomicU64,
    commits_too_large: AtomicU64,
}

struct Inner {
    sender: TransportSender,
    format: Option<AudioFormat>,
    region: WriteRegion,
    scratch: Vec<u8>,
}

/// Everything the intercepted render calls need, for one process.
///
/// Interceptors forward the host's three calls here:
///
/// - request-buffer: [`on_request_buffer`](Self::on_request_buffer)
/// - commit-buffer: [`on_commit_buffer`](Self::on_commit_buffer)
/// - negotiate-format: [`on_negotiate_format`](Self::on_negotiate_format)
///
/// All three run on the host's audio thread. They take only this context's
/// own lock, allocate only when the scratch buffer first grows, and never
/// wait on the consumer beyond the sender's bounded attempts.
pub struct CaptureContext {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    max_message_size: usize,
    counters: Counters,
}

impl CaptureContext {
    /// Creates a context sending through `sender`.
    pub fn new(sender: TransportSender, max_message_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sender,
                format: None,
                region: WriteRegion::EMPTY,
                scratch: Vec::with_capacity(max_message_size),
            }),
            clock,
            max_message_size,
            counters: Counters::default(),
        }
    }

    /// Context for the calling process, stamped by the system clock.
    pub fn for_current_process(config: &TransportConfig) -> Self {
        Self::for_pid(std::process::id(), config)
    }

    /// Context sending on the channel of `pid`.
    pub fn for_pid(pid: u32, config: &TransportConfig) -> Self {
        Self::new(
            TransportSender::for_pid(pid, config),
            config.max_message_size,
            Arc::new(SystemClock),
        )
    }

    /// Records where the host will write its next buffer.
    pub fn on_request_buffer(&self, region: WriteRegion) {
        self.inner.lock().region = region;
    }

    /// Records the host's (re)negotiated stream format.
    pub fn on_negotiate_format(&self, format: AudioFormat) {
        let mut inner = self.inner.lock();
        if inner.format != Some(format) {
            tracing::trace!(%format, "Render format negotiated");
        }
        inner.format = Some(format);
    }

    /// Ships `frames` frames from the pending region to the consumer.
    ///
    /// `clock_ns` is the device's presentation time for the first frame, if
    /// the backend has one; otherwise the context's clock stamps the chunk.
    pub fn on_commit_buffer(&self, frames: u32, clock_ns: Option<u64>) {
        self.counters.commits_seen.fetch_add(1, Ordering::Relaxed);
        if frames == 0 {
            self.counters
                .zero_frame_skipped
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        let timestamp = clock_ns.unwrap_or_else(|| self.clock.now_ns());

        let mut guard = self.inner.lock();
        let Inner {
            sender,
            format,
            region,
            scratch,
        } = &mut *guard;

        let Some(format) = *format else {
            self.counters
                .commits_unreadable
                .fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Some(payload) = region.committed(frames as usize * format.block_align()) else {
            self.counters
                .commits_unreadable
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        let chunks = match split_commit(format, frames, timestamp, payload, self.max_message_size)
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::trace!(frames, error = %e, "Commit too large to send");
                self.counters
                    .commits_too_large
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        for message in chunks {
            scratch.clear();
            message.encode_into(scratch);
            let counter = if sender.send(scratch) {
                &self.counters.chunks_sent
            } else {
                &self.counters.chunks_dropped
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Format of the host's current stream, once negotiated.
    pub fn format(&self) -> Option<AudioFormat> {
        self.inner.lock().format
    }

    /// Snapshot of the commit path counters.
    pub fn stats(&self) -> ProbeStats {
        ProbeStats {
            commits_seen: self.counters.commits_seen.load(Ordering::Relaxed),
            zero_frame_skipped: self.counters.zero_frame_skipped.load(Ordering::Relaxed),
            chunks_sent: self.counters.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: self.counters.chunks_dropped.load(Ordering::Relaxed),
            commits_unreadable: self.counters.commits_unreadable.load(Ordering::Relaxed),
            commits_too_large: self.counters.commits_too_large.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureContext")
            .field("format", &self.format())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
