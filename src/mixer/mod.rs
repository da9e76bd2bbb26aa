//! Synchronizing mixer.
//!
//! Merges any number of independently clocked producers into one stream that
//! advances in lockstep with the wall clock. Producers place frames by
//! absolute timestamp; the output side pops one segment at a time once real
//! time has moved past it.
//!
//! ```text
//!            base_timestamp
//!                 │
//!                 ▼
//!   ┌─────────────┬─────────────┬─────────────┐
//!   │   past      │   present   │   future    │
//!   └─────────────┴─────────────┴─────────────┘
//!    popped next   ◀── late chunks still land here
//! ```
//!
//! The front segment is "past" tolerance for late or reordered chunks; the
//! other two absorb producers that run ahead. Anything that maps outside the
//! window is dropped and counted.

mod window;

pub use window::SEGMENTS;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::frame::{AudioFrame, OutputChunk, OUTPUT_SAMPLE_RATE};
use crate::wire::frames_to_ns;
use window::RingWindow;

/// Where a chunk ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Mixed at `index`; `frames` may be fewer than offered if the chunk ran
    /// past the end of the window.
    Mixed {
        /// First slot written.
        index: usize,
        /// Frames actually mixed.
        frames: usize,
    },
    /// The timestamp mapped outside the window.
    Overrun {
        /// The out-of-range index.
        index: i64,
    },
}

/// Additive ring buffer paced by wall-clock time.
///
/// One lock covers the whole window, so `resize`, `mix`, and `pop` are
/// mutually exclusive and each holds the lock only for a bounded copy.
pub struct SyncMixer {
    clock: Arc<dyn Clock>,
    window: Mutex<RingWindow>,
    overruns: AtomicU64,
    frames_mixed: AtomicU64,
}

impl SyncMixer {
    /// Creates a mixer holding `capacity` frames (rounded down to a multiple
    /// of three).
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let window = Self::fresh_window(capacity, clock.as_ref());
        Self {
            clock,
            window: Mutex::new(window),
            overruns: AtomicU64::new(0),
            frames_mixed: AtomicU64::new(0),
        }
    }

    /// Creates a mixer whose window spans `duration`.
    pub fn with_duration(duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::new(Self::frames_for_duration(duration), clock)
    }

    /// Frames at the output rate covering `duration`, rounded down.
    pub fn frames_for_duration(duration: Duration) -> usize {
        (duration.as_nanos() * u128::from(OUTPUT_SAMPLE_RATE) / 1_000_000_000) as usize
    }

    /// Duration of `frames` at the output rate, rounded down to the nanosecond.
    pub fn duration_for_frames(frames: usize) -> Duration {
        Duration::from_nanos(frames_to_ns(frames as u64, OUTPUT_SAMPLE_RATE))
    }

    fn fresh_window(capacity: usize, clock: &dyn Clock) -> RingWindow {
        let segment = frames_to_ns((capacity / SEGMENTS) as u64, OUTPUT_SAMPLE_RATE);
        RingWindow::new(capacity, clock.now_ns().saturating_sub(segment))
    }

    /// Discards all buffered audio and rebuilds the window at `capacity`.
    ///
    /// Slot 0 is re-anchored one segment in the past, so the next pop becomes
    /// due one segment duration from now.
    pub fn resize(&self, capacity: usize) {
        let fresh = Self::fresh_window(capacity, self.clock.as_ref());
        let mut window = self.window.lock();
        *window = fresh;
        tracing::debug!(
            capacity = window.capacity(),
            segment_frames = window.segment_frames(),
            "Mixer resized"
        );
    }

    /// Window size in frames; always a multiple of three.
    pub fn capacity(&self) -> usize {
        self.window.lock().capacity()
    }

    /// Frames per segment.
    pub fn segment_frames(&self) -> usize {
        self.window.lock().segment_frames()
    }

    /// Playback duration of one segment.
    pub fn segment_duration(&self) -> Duration {
        Self::duration_for_frames(self.segment_frames())
    }

    /// Wall-clock time of slot 0, in ns since the UNIX epoch.
    pub fn base_timestamp(&self) -> u64 {
        self.window.lock().base_timestamp()
    }

    /// Wall-clock time of slot `index`.
    pub fn timestamp_for_index(&self, index: usize) -> u64 {
        self.window.lock().timestamp_at(index as u64)
    }

    /// Offset of `timestamp` from slot 0, in output frames.
    ///
    /// Negative or `>= capacity()` results are outside the window; callers
    /// discard them.
    pub fn index_for(&self, timestamp: u64) -> i64 {
        self.window.lock().index_for(timestamp)
    }

    /// Adds `frames` into the window starting at `index`.
    ///
    /// Never overwrites and never wraps: overlapping calls sum, and frames
    /// past the end are dropped. Returns how many frames were mixed.
    pub fn mix(&self, frames: &[AudioFrame], index: usize) -> usize {
        let mixed = self.window.lock().mix(frames, index);
        self.frames_mixed.fetch_add(mixed as u64, Ordering::Relaxed);
        mixed
    }

    /// Maps `timestamp` to an index and mixes there, under one lock.
    ///
    /// Chunks whose start falls outside the window are dropped and counted in
    /// [`overruns`](Self::overruns).
    pub fn place(&self, timestamp: u64, frames: &[AudioFrame]) -> Placement {
        let mut window = self.window.lock();
        let index = window.index_for(timestamp);
        if index < 0 || index >= window.capacity() as i64 {
            drop(window);
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return Placement::Overrun { index };
        }
        let mixed = window.mix(frames, index as usize);
        drop(window);

        self.frames_mixed.fetch_add(mixed as u64, Ordering::Relaxed);
        Placement::Mixed {
            index: index as usize,
            frames: mixed,
        }
    }

    /// True once the wall clock is a full segment past the end of the front
    /// segment, i.e. `now >= base + 2 × segment`.
    pub fn ready_to_pop(&self) -> bool {
        let window = self.window.lock();
        if window.capacity() == 0 {
            return false;
        }
        let due = window.timestamp_at(2 * window.segment_frames() as u64);
        self.clock.now_ns() >= due
    }

    /// Removes the front segment and returns it, appending silence at the
    /// tail and advancing slot 0 by one segment.
    pub fn pop(&self) -> OutputChunk {
        let mut window = self.window.lock();
        let timestamp = window.base_timestamp();
        let frames = window.pop();
        OutputChunk::new(frames, timestamp)
    }

    /// Chunks dropped because they mapped outside the window.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Total frames mixed since creation.
    pub fn frames_mixed(&self) -> u64 {
        self.frames_mixed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SyncMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.window.lock();
        f.debug_struct("SyncMixer")
            .field("capacity", &window.capacity())
            .field("base_timestamp", &window.base_timestamp())
            .field("overruns", &self.overruns())
            .finish_non_exhaustive()
    }
}
