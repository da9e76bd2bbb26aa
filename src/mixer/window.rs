//! The ring window behind [`SyncMixer`](super::SyncMixer).

use std::collections::VecDeque;

use crate::frame::{AudioFrame, OUTPUT_SAMPLE_RATE};
use crate::wire::frames_to_ns;

/// Number of equal segments the window is split into.
pub const SEGMENTS: usize = 3;

/// Three contiguous segments of frames anchored to wall-clock time.
///
/// Slot 0 of the front segment plays at `base_timestamp()`. The anchor is
/// tracked as an origin plus a count of popped frames, so it never
/// accumulates rounding error no matter how many segments are popped.
#[derive(Debug)]
pub(crate) struct RingWindow {
    segments: VecDeque<Vec<AudioFrame>>,
    segment_frames: usize,
    origin_ns: u64,
    frames_popped: u64,
}

impl RingWindow {
    /// Creates a zeroed window of `capacity` frames, rounded down to a
    /// multiple of [`SEGMENTS`], whose slot 0 plays at `base_ns`.
    pub(crate) fn new(capacity: usize, base_ns: u64) -> Self {
        let segment_frames = capacity / SEGMENTS;
        let segments = (0..SEGMENTS)
            .map(|_| vec![AudioFrame::SILENCE; segment_frames])
            .collect();
        Self {
            segments,
            segment_frames,
            origin_ns: base_ns,
            frames_popped: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.segment_frames * SEGMENTS
    }

    pub(crate) fn segment_frames(&self) -> usize {
        self.segment_frames
    }

    pub(crate) fn base_timestamp(&self) -> u64 {
        self.timestamp_at(0)
    }

    /// Wall-clock time of `offset` frames past slot 0.
    pub(crate) fn timestamp_at(&self, offset: u64) -> u64 {
        self.origin_ns + frames_to_ns(self.frames_popped + offset, OUTPUT_SAMPLE_RATE)
    }

    /// Signed frame offset of `timestamp` from slot 0, rounded to nearest.
    pub(crate) fn index_for(&self, timestamp: u64) -> i64 {
        let delta = i128::from(timestamp) - i128::from(self.base_timestamp());
        let scaled = delta * i128::from(OUTPUT_SAMPLE_RATE);
        let half = 500_000_000i128;
        let rounded = if scaled >= 0 {
            (scaled + half) / 1_000_000_000
        } else {
            (scaled - half) / 1_000_000_000
        };
        rounded.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    /// Adds `frames` into the window starting at `index`.
    ///
    /// Frames that would land past the end are discarded. Returns how many
    /// were mixed.
    pub(crate) fn mix(&mut self, frames: &[AudioFrame], index: usize) -> usize {
        let capacity = self.capacity();
        if index >= capacity {
            return 0;
        }
        let count = frames.len().min(capacity - index);

        let mut position = index;
        let mut source = &frames[..count];
        while !source.is_empty() {
            let segment = position / self.segment_frames;
            let offset = position % self.segment_frames;
            let slots = &mut self.segments[segment][offset..];
            let n = slots.len().min(source.len());
            for (slot, frame) in slots[..n].iter_mut().zip(&source[..n]) {
                *slot += *frame;
            }
            source = &source[n..];
            position += n;
        }
        count
    }

    /// Takes the front segment, appends a silent one, and advances slot 0 by
    /// one segment.
    pub(crate) fn pop(&mut self) -> Vec<AudioFrame> {
        let front = self.segments.pop_front().unwrap_or_default();
        self.segments
            .push_back(vec![AudioFrame::SILENCE; self.segment_frames]);
        self.frames_popped += self.segment_frames as u64;
        front
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(values: &[f32]) -> Vec<AudioFrame> {
        values.iter().map(|&v| AudioFrame::splat(v)).collect()
    }

    fn left(frames: &[AudioFrame]) -> Vec<f32> {
        frames.iter().map(|f| f.samples[0]).collect()
    }

    #[test]
    fn test_capacity_rounds_down_to_segments() {
        assert_eq!(RingWindow::new(10, 0).capacity(), 9);
        assert_eq!(RingWindow::new(9, 0).segment_frames(), 3);
        assert_eq!(RingWindow::new(2, 0).capacity(), 0);
    }

    #[test]
    fn test_mix_spans_segments() {
        let mut window = RingWindow::new(9, 0);
        assert_eq!(window.mix(&frames(&[1.0, 2.0, 3.0, 4.0]), 2), 4);

        assert_eq!(left(&window.pop()), vec![0.0, 0.0, 1.0]);
        assert_eq!(left(&window.pop()), vec![2.0, 3.0, 4.0]);
        assert_eq!(left(&window.pop()), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mix_truncates_at_end_without_wrapping() {
        let mut window = RingWindow::new(6, 0);
        assert_eq!(window.mix(&frames(&[1.0, 1.0, 1.0]), 5), 1);
        assert_eq!(window.mix(&frames(&[1.0]), 6), 0);

        assert_eq!(left(&window.pop()), vec![0.0, 0.0]);
        assert_eq!(left(&window.pop()), vec![0.0, 0.0]);
        assert_eq!(left(&window.pop()), vec![0.0, 1.0]);
    }

    #[test]
    fn test_mix_accumulates() {
        let mut window = RingWindow::new(3, 0);
        window.mix(&frames(&[0.25]), 0);
        window.mix(&frames(&[0.5]), 0);
        assert_eq!(left(&window.pop()), vec![0.75]);
    }

    #[test]
    fn test_pop_advances_base_by_segment() {
        // 4410 frames per segment = 100ms at 44.1kHz
        let mut window = RingWindow::new(13_230, 1_000);
        assert_eq!(window.base_timestamp(), 1_000);
        window.pop();
        assert_eq!(window.base_timestamp(), 1_000 + 100_000_000);
        window.pop();
        assert_eq!(window.base_timestamp(), 1_000 + 200_000_000);
        assert_eq!(window.capacity(), 13_230);
    }

    #[test]
    fn test_index_for_rounds_and_is_signed() {
        let window = RingWindow::new(300, 1_000_000_000);
        assert_eq!(window.index_for(1_000_000_000), 0);
        // One frame is ~22675.7ns
        assert_eq!(window.index_for(1_000_022_676), 1);
        assert_eq!(window.index_for(1_000_000_000 - 22_676), -1);
        assert_eq!(window.index_for(1_010_000_000), 441);
    }

    #[test]
    fn test_timestamp_at_inverts_index_for() {
        let mut window = RingWindow::new(300, 5_000_000_000);
        window.pop();
        for offset in [0u64, 1, 99, 299] {
            let ts = window.timestamp_at(offset);
            assert_eq!(window.index_for(ts), offset as i64);
        }
    }
}
