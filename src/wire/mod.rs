//! Wire format shared by the capture probe and producer sessions.
//!
//! Every message is self-describing: a fixed 24-byte little-endian header
//! followed by raw interleaved samples.
//!
//! ```text
//! offset  size  field
//!      0     4  channel_layout   (ChannelLayout code)
//!      4     4  sample_format    (SampleFormat code)
//!      8     4  sample_rate      (Hz)
//!     12     4  frame_count
//!     16     8  timestamp        (ns since UNIX epoch)
//!     24     -  payload          (frame_count × channels × sample_size bytes)
//! ```
//!
//! Commits larger than [`MAX_MESSAGE_SIZE`] are split by [`split_commit`]
//! into chunks that each carry their own header, so a receiver never has to
//! reassemble anything.

mod chunking;
mod message;

pub use chunking::{split_commit, CommitChunks};
pub use message::{MessageHeader, WireMessage};

/// Prefix of every channel name; the producer's process id is appended.
pub const CHANNEL_PREFIX: &str = "AudioHook_Pipe";

/// Largest encoded message, header included.
pub const MAX_MESSAGE_SIZE: usize = 12 * 1024;

/// Size of the fixed message header.
pub const HEADER_LEN: usize = 24;

/// Commits that would split into more chunks than this are dropped whole.
pub const MAX_CHUNKS_PER_COMMIT: usize = 32;

/// Returns the channel name for a producer process.
///
/// # Example
///
/// ```
/// assert_eq!(app_audio_capture::wire::channel_name(4242), "AudioHook_Pipe4242");
/// ```
pub fn channel_name(pid: u32) -> String {
    format!("{CHANNEL_PREFIX}{pid}")
}

/// Nanoseconds spanned by `frames` at `sample_rate`, rounded down.
pub fn frames_to_ns(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (u128::from(frames) * 1_000_000_000 / u128::from(sample_rate)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_are_distinct_per_pid() {
        assert_eq!(channel_name(1), "AudioHook_Pipe1");
        assert_ne!(channel_name(12), channel_name(123));
    }

    #[test]
    fn test_frames_to_ns() {
        assert_eq!(frames_to_ns(44_100, 44_100), 1_000_000_000);
        assert_eq!(frames_to_ns(441, 44_100), 10_000_000);
        assert_eq!(frames_to_ns(1, 0), 0);
    }
}
