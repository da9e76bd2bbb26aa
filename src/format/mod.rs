//! Audio format description and normalization.
//!
//! Producers render in whatever format their audio client negotiated. This
//! module describes those formats and converts them to the mixer's fixed
//! output format:
//! - Sample decoding (u8 / i16 / i32 / f32 → f32)
//! - Channel downmix (any supported layout → stereo)
//! - Sample rate conversion (streaming resampler)

mod convert;
mod layout;
mod resample;
mod sample;
mod wave;

pub use convert::{default_converter_factory, ConverterFactory, FormatConvert, LinearConverter};
pub use layout::{downmix_to_stereo, ChannelLayout};
pub use resample::Resampler;
pub use sample::{decode_sample, i16_to_f32, i32_to_f32, u8_to_f32, SampleFormat};
pub use wave::{WaveFormat, WaveSubFormat};

/// A negotiated render format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Encoding of each sample.
    pub sample_format: SampleFormat,
    /// Speaker arrangement; determines the channel count.
    pub channel_layout: ChannelLayout,
    /// Frames per second.
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Creates a format description.
    pub const fn new(
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> Self {
        Self {
            sample_format,
            channel_layout,
            sample_rate,
        }
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> usize {
        self.channel_layout.channels()
    }

    /// Bytes per frame (`channels × sample_size`).
    pub fn block_align(&self) -> usize {
        self.channels() * self.sample_format.sample_size()
    }

    /// Returns `true` if frames in this format can be decoded.
    pub fn is_supported(&self) -> bool {
        self.block_align() > 0 && self.sample_rate > 0
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{:?}@{}Hz",
            self.sample_format, self.channel_layout, self.sample_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_align() {
        let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::FivePointOne, 48000);
        assert_eq!(format.channels(), 6);
        assert_eq!(format.block_align(), 24);
        assert!(format.is_supported());
    }

    #[test]
    fn test_unknown_is_unsupported() {
        let format = AudioFormat::new(SampleFormat::Unknown, ChannelLayout::Stereo, 48000);
        assert_eq!(format.block_align(), 0);
        assert!(!format.is_supported());

        let format = AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 0);
        assert!(!format.is_supported());
    }

    #[test]
    fn test_display() {
        let format = AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44100);
        assert_eq!(format.to_string(), "I16/Stereo@44100Hz");
    }
}
