//! Sample rate conversion.
//!
//! Linear interpolation over a continuous stream. The resampler carries its
//! read position and the last input frame from one block to the next, so a
//! signal fed in pieces converts to exactly the frames it would whole. For
//! higher quality, plug a different [`FormatConvert`](super::FormatConvert)
//! into the producer sessions.

use crate::frame::AudioFrame;

/// Streaming linear-interpolation resampler for stereo frames.
///
/// Output frame `k` of a stream sits at input position `k × from / to`.
/// Positions are kept as integers in units of `1 / to` of an input frame, so
/// block boundaries never introduce rounding.
///
/// An output frame that needs an input frame not yet seen is held back and
/// emitted by the next [`process`](Self::process) call.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    // Position of the next output frame, relative to the first frame of the
    // next input block. In (-to_rate, ∞) once a block has been processed.
    next: i64,
    previous: Option<AudioFrame>,
}

impl Resampler {
    /// Creates a resampler from `from_rate` to `to_rate` Hz.
    ///
    /// A zero rate on either side yields no output.
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            next: 0,
            previous: None,
        }
    }

    /// Whether input passes through unchanged.
    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Forgets the stream; the next block starts a new one at position zero.
    pub fn reset(&mut self) {
        self.next = 0;
        self.previous = None;
    }

    /// Time from the first frame of the next input block to the first frame
    /// the next [`process`](Self::process) call emits.
    ///
    /// Negative when that output frame lies between the previous block's last
    /// frame and the next block's first.
    pub fn lead_ns(&self) -> i64 {
        if self.from_rate == 0 || self.to_rate == 0 {
            return 0;
        }
        let scaled = i128::from(self.next) * 1_000_000_000;
        let per_frame = i128::from(self.from_rate) * i128::from(self.to_rate);
        let half = per_frame / 2;
        let rounded = if scaled >= 0 {
            (scaled + half) / per_frame
        } else {
            (scaled - half) / per_frame
        };
        rounded as i64
    }

    /// Appends the output frames `input` completes to `output`.
    pub fn process(&mut self, input: &[AudioFrame], output: &mut Vec<AudioFrame>) {
        if self.from_rate == 0 || self.to_rate == 0 || input.is_empty() {
            return;
        }
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }

        let to = i64::from(self.to_rate);
        let step = i64::from(self.from_rate);
        let len = input.len() as i64;
        let last = (len - 1) * to;

        while self.next <= last {
            let index = self.next.div_euclid(to);
            let frac = self.next.rem_euclid(to);
            let a = match usize::try_from(index) {
                Ok(i) => input[i],
                // index is -1: the frame straddles the block boundary
                Err(_) => self.previous.unwrap_or(input[0]),
            };
            let frame = if frac == 0 {
                a
            } else {
                lerp(a, input[(index + 1) as usize], frac as f32 / to as f32)
            };
            output.push(frame);
            self.next += step;
        }

        self.next -= len * to;
        self.previous = input.last().copied();
    }
}

fn lerp(a: AudioFrame, b: AudioFrame, t: f32) -> AudioFrame {
    let mut out = a;
    for (o, (s1, s2)) in out.samples.iter_mut().zip(a.samples.iter().zip(b.samples)) {
        *o = s1 + (s2 - s1) * t;
    }
    out
}
