//! Splitting a commit into bounded, self-describing chunks.

use super::{frames_to_ns, MessageHeader, WireMessage, HEADER_LEN, MAX_CHUNKS_PER_COMMIT};
use crate::error::WireError;
use crate::format::AudioFormat;

/// Iterator over the chunks of one commit, in frame order.
///
/// Each chunk's timestamp is offset by the duration of the frames before it,
/// so chunks can be placed independently and in any order.
#[derive(Debug, Clone)]
pub struct CommitChunks<'a> {
    format: AudioFormat,
    timestamp: u64,
    payload: &'a [u8],
    frames_per_chunk: usize,
    total_frames: usize,
    next_frame: usize,
}

impl<'a> Iterator for CommitChunks<'a> {
    type Item = WireMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_frame >= self.total_frames {
            return None;
        }
        let frames = self.frames_per_chunk.min(self.total_frames - self.next_frame);
        let block_align = self.format.block_align();
        let start = self.next_frame * block_align;
        let payload = &self.payload[start..start + frames * block_align];

        let header = MessageHeader {
            format: self.format,
            frame_count: frames as u32,
            timestamp: self.timestamp
                + frames_to_ns(self.next_frame as u64, self.format.sample_rate),
        };
        self.next_frame += frames;

        Some(WireMessage { header, payload })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_frames - self.next_frame).div_ceil(self.frames_per_chunk.max(1));
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CommitChunks<'_> {}

/// Splits `frame_count` frames of `payload` into messages no larger than
/// `max_message_size` bytes each.
///
/// Returns [`WireError::TooLarge`] if a single frame cannot fit, or if the
/// commit would need more than [`MAX_CHUNKS_PER_COMMIT`] chunks.
pub fn split_commit(
    format: AudioFormat,
    frame_count: u32,
    timestamp: u64,
    payload: &[u8],
    max_message_size: usize,
) -> Result<CommitChunks<'_>, WireError> {
    let block_align = format.block_align();
    let needed = frame_count as usize * block_align;
    if payload.len() < needed {
        return Err(WireError::PayloadLengthMismatch {
            expected: needed,
            actual: payload.len(),
        });
    }

    let frames_per_chunk = max_message_size
        .saturating_sub(HEADER_LEN)
        .checked_div(block_align)
        .unwrap_or(0);
    if frames_per_chunk == 0 {
        return Err(WireError::TooLarge {
            len: HEADER_LEN + block_align,
            max: max_message_size,
        });
    }

    let chunks = (frame_count as usize).div_ceil(frames_per_chunk);
    if chunks > MAX_CHUNKS_PER_COMMIT {
        return Err(WireError::TooLarge {
            len: chunks * HEADER_LEN + needed,
            max: MAX_CHUNKS_PER_COMMIT * max_message_size,
        });
    }

    Ok(CommitChunks {
        format,
        timestamp,
        payload: &payload[..needed],
        frames_per_chunk,
        total_frames: frame_count as usize,
        next_frame: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};
    use crate::wire::MAX_MESSAGE_SIZE;

    fn f32_stereo() -> AudioFormat {
        AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, 48000)
    }

    #[test]
    fn test_small_commit_is_one_chunk() {
        let payload = vec![1u8; 100 * 8];
        let chunks: Vec<_> = split_commit(f32_stereo(), 100, 5, &payload, MAX_MESSAGE_SIZE)
            .unwrap()
            .collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header.frame_count, 100);
        assert_eq!(chunks[0].header.timestamp, 5);
        assert_eq!(chunks[0].payload.len(), 800);
    }

    #[test]
    fn test_large_commit_splits_on_frame_boundaries() {
        // (12288 - 24) / 8 = 1533 frames per chunk
        let frames = 4000u32;
        let payload: Vec<u8> = (0..frames as usize * 8).map(|i| i as u8).collect();
        let chunks: Vec<_> = split_commit(f32_stereo(), frames, 0, &payload, MAX_MESSAGE_SIZE)
            .unwrap()
            .collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].header.frame_count, 1533);
        assert_eq!(chunks[1].header.frame_count, 1533);
        assert_eq!(chunks[2].header.frame_count, 934);
        for chunk in &chunks {
            assert!(chunk.encoded_len() <= MAX_MESSAGE_SIZE);
        }

        let rejoined: Vec<u8> = chunks.iter().flat_map(|c| c.payload.iter().copied()).collect();
        assert_eq!(rejoined, payload);
    }

    #[test]
    fn test_chunk_timestamps_are_offset() {
        let payload = vec![0u8; 96 * 8];
        let chunks: Vec<_> = split_commit(f32_stereo(), 96, 1_000, &payload, HEADER_LEN + 48 * 8)
            .unwrap()
            .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].header.timestamp, 1_000);
        // 48 frames at 48kHz = 1ms
        assert_eq!(chunks[1].header.timestamp, 1_000 + 1_000_000);
    }

    #[test]
    fn test_exact_size_hint() {
        let payload = vec![0u8; 10 * 8];
        let chunks = split_commit(f32_stereo(), 10, 0, &payload, HEADER_LEN + 3 * 8).unwrap();
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_too_many_chunks_rejected() {
        let payload = vec![0u8; 100 * 8];
        let result = split_commit(f32_stereo(), 100, 0, &payload, HEADER_LEN + 8);
        assert!(matches!(result, Err(WireError::TooLarge { .. })));
    }

    #[test]
    fn test_frame_larger_than_limit_rejected() {
        let payload = vec![0u8; 8];
        let result = split_commit(f32_stereo(), 1, 0, &payload, HEADER_LEN + 4);
        assert!(matches!(result, Err(WireError::TooLarge { .. })));
    }

    #[test]
    fn test_short_payload_rejected() {
        let payload = vec![0u8; 10];
        let result = split_commit(f32_stereo(), 2, 0, &payload, MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(WireError::PayloadLengthMismatch { .. })));
    }
}
