//! Configuration types for capture sessions.

use std::path::PathBuf;
use std::time::Duration;

use crate::wire::MAX_MESSAGE_SIZE;

/// Preset sizes for the synchronizing mixer's ring window.
///
/// A third of the window is "past" tolerance for late chunks and two thirds
/// are "future" buffering, so larger presets trade latency for robustness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPreset {
    /// 240ms window.
    Smallest,
    /// 360ms window.
    Small,
    /// 480ms window.
    #[default]
    Normal,
    /// 600ms window.
    Biggest,
}

impl BufferPreset {
    /// Returns the total ring window duration for this preset.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::Smallest => Duration::from_millis(240),
            Self::Small => Duration::from_millis(360),
            Self::Normal => Duration::from_millis(480),
            Self::Biggest => Duration::from_millis(600),
        }
    }
}

/// How often target processes are rediscovered and producers attached or detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateRate {
    /// Every 2 seconds.
    Slow,
    /// Every second.
    #[default]
    Normal,
    /// Every 500ms.
    Fast,
    /// Every 250ms.
    Fastest,
}

impl UpdateRate {
    /// Returns the refresh interval for this rate.
    #[must_use]
    pub fn interval(&self) -> Duration {
        match self {
            Self::Slow => Duration::from_secs(2),
            Self::Normal => Duration::from_secs(1),
            Self::Fast => Duration::from_millis(500),
            Self::Fastest => Duration::from_millis(250),
        }
    }
}

/// Transport channel settings shared by senders and receivers.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Write attempts per message before it is dropped.
    ///
    /// Each attempt reconnects if needed; there is no sleep between attempts.
    /// Default: 3
    pub send_attempts: u32,

    /// Upper bound on a single blocking write from the audio thread.
    ///
    /// Default: 2ms
    pub write_timeout: Duration,

    /// Largest encoded message, header included.
    ///
    /// Larger commits are split into self-describing chunks.
    /// Default: 12 KiB
    pub max_message_size: usize,

    /// Directory holding Unix socket files. `None` uses the system temp dir.
    ///
    /// Ignored on Windows, where channels are named pipes.
    pub socket_dir: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            send_attempts: 3,
            write_timeout: Duration::from_millis(2),
            max_message_size: MAX_MESSAGE_SIZE,
            socket_dir: None,
        }
    }
}

/// Configuration for capture session behavior.
///
/// Use [`CaptureConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use app_audio_capture::{BufferPreset, CaptureConfig, UpdateRate};
///
/// let config = CaptureConfig::default()
///     .with_buffer(BufferPreset::Small)
///     .with_update_rate(UpdateRate::Fast);
/// assert_eq!(config.buffer_duration.as_millis(), 360);
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Total duration of the mixer's ring window.
    ///
    /// Default: 480ms ([`BufferPreset::Normal`])
    pub buffer_duration: Duration,

    /// Interval between target discovery passes.
    ///
    /// Default: 1s ([`UpdateRate::Normal`])
    pub update_interval: Duration,

    /// How often the output task checks whether a segment is ready.
    ///
    /// Default: 10ms
    pub poll_interval: Duration,

    /// Number of retry attempts for failed sink writes.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Initial delay between sink retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt). Retries stop
    /// early once the total wait would exceed the segment's play time.
    /// Default: 100ms
    pub sink_retry_delay: Duration,

    /// Transport channel settings.
    pub transport: TransportConfig,
}

impl CaptureConfig {
    /// Sets the ring window from a preset.
    #[must_use]
    pub fn with_buffer(mut self, preset: BufferPreset) -> Self {
        self.buffer_duration = preset.duration();
        self
    }

    /// Sets the discovery cadence from a preset.
    #[must_use]
    pub fn with_update_rate(mut self, rate: UpdateRate) -> Self {
        self.update_interval = rate.interval();
        self
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_duration: BufferPreset::default().duration(),
            update_interval: UpdateRate::default().interval(),
            poll_interval: Duration::from_millis(10),
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
            transport: TransportConfig::default(),
        }
    }
}
