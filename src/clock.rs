//! Shared time base for producers and the mixer.
//!
//! Timestamps are nanoseconds since the UNIX epoch. The wall clock is the
//! only time base every process on the machine can read without coordination,
//! which is what lets a probe in one process stamp chunks that the mixer in
//! another process can place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" in nanoseconds.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since the UNIX epoch.
    fn now_ns(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        wall_clock_ns()
    }
}

/// Reads the wall clock. A clock set before 1970 reads as zero.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A clock that only moves when told to.
///
/// Makes mixer pacing deterministic in tests and offline rendering.
///
/// # Example
///
/// ```
/// use app_audio_capture::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_micros(1));
/// assert_eq!(clock.now_ns(), 2_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start_ns`.
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Jumps to an absolute reading.
    pub fn set(&self, now_ns: u64) {
        self.now.store(now_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
