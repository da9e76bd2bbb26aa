//! Output frames and chunks.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use crate::wire::frames_to_ns;

/// Channel count of everything the mixer produces.
pub const OUTPUT_CHANNELS: usize = 2;

/// Sample rate of everything the mixer produces.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// One instant of stereo audio in the mixer's output format.
///
/// The atomic unit of mixing: frames are only ever summed, never partially
/// written.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFrame {
    /// Samples in channel order (left, right).
    pub samples: [f32; OUTPUT_CHANNELS],
}

impl AudioFrame {
    /// A frame of silence.
    pub const SILENCE: Self = Self {
        samples: [0.0; OUTPUT_CHANNELS],
    };

    /// Creates a stereo frame.
    pub const fn new(left: f32, right: f32) -> Self {
        Self {
            samples: [left, right],
        }
    }

    /// Creates a frame with the same sample on every channel.
    pub const fn splat(sample: f32) -> Self {
        Self {
            samples: [sample; OUTPUT_CHANNELS],
        }
    }

    /// Returns `true` if every channel is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

impl AddAssign for AudioFrame {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.samples.iter_mut().zip(rhs.samples) {
            *a += b;
        }
    }
}

/// One segment popped from the mixer.
///
/// Frames are wrapped in an `Arc` so every sink shares the same allocation.
///
/// # Example
///
/// ```
/// use app_audio_capture::{AudioFrame, OutputChunk};
/// use std::time::Duration;
///
/// let chunk = OutputChunk::new(vec![AudioFrame::SILENCE; 4410], 0);
/// assert_eq!(chunk.duration(), Duration::from_millis(100));
/// assert_eq!(chunk.interleaved().len(), 8820);
/// ```
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Mixed frames, in playback order.
    pub frames: Arc<Vec<AudioFrame>>,

    /// Wall-clock time of the first frame, in nanoseconds since the UNIX epoch.
    ///
    /// Strictly increasing from one chunk to the next.
    pub timestamp: u64,

    /// Always [`OUTPUT_SAMPLE_RATE`].
    pub sample_rate: u32,

    /// Always [`OUTPUT_CHANNELS`].
    pub channels: u16,
}

impl OutputChunk {
    /// Creates a chunk in the fixed output format.
    pub fn new(frames: Vec<AudioFrame>, timestamp: u64) -> Self {
        Self {
            frames: Arc::new(frames),
            timestamp,
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: OUTPUT_CHANNELS as u16,
        }
    }

    /// Returns the playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(frames_to_ns(self.frames.len() as u64, self.sample_rate))
    }

    /// Returns the number of frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if this chunk holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Flattens the frames into interleaved samples (L, R, L, R, ...).
    pub fn interleaved(&self) -> Vec<f32> {
        self.frames.iter().flat_map(|f| f.samples).collect()
    }
}
