//! Mapping from WAVE format descriptors to [`AudioFormat`].
//!
//! Render clients describe their stream with a `WAVEFORMATEX`, optionally
//! extended with a channel mask and a sub-format GUID. Backends copy the
//! relevant fields into [`WaveFormat`] so the mapping stays portable and
//! testable.

use super::{AudioFormat, ChannelLayout, SampleFormat};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const SPEAKER_FRONT_LEFT: u32 = 0x1;
const SPEAKER_FRONT_RIGHT: u32 = 0x2;
const SPEAKER_FRONT_CENTER: u32 = 0x4;
const SPEAKER_LOW_FREQUENCY: u32 = 0x8;
const SPEAKER_BACK_LEFT: u32 = 0x10;
const SPEAKER_BACK_RIGHT: u32 = 0x20;
const SPEAKER_BACK_CENTER: u32 = 0x100;
const SPEAKER_SIDE_LEFT: u32 = 0x200;
const SPEAKER_SIDE_RIGHT: u32 = 0x400;

const MASK_2POINT1: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_LOW_FREQUENCY;
const MASK_SURROUND: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_BACK_CENTER;
const MASK_4POINT1: u32 = MASK_SURROUND | SPEAKER_LOW_FREQUENCY;
const MASK_5POINT1_SURROUND: u32 = SPEAKER_FRONT_LEFT
    | SPEAKER_FRONT_RIGHT
    | SPEAKER_FRONT_CENTER
    | SPEAKER_LOW_FREQUENCY
    | SPEAKER_SIDE_LEFT
    | SPEAKER_SIDE_RIGHT;
const MASK_7POINT1_SURROUND: u32 = MASK_5POINT1_SURROUND | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT;

/// Sample encoding named by an extensible format's sub-format GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveSubFormat {
    /// `KSDATAFORMAT_SUBTYPE_PCM`.
    Pcm,
    /// `KSDATAFORMAT_SUBTYPE_IEEE_FLOAT`.
    IeeeFloat,
    /// Anything else.
    Other,
}

/// Fields of a `WAVEFORMATEX` / `WAVEFORMATEXTENSIBLE` relevant to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    /// `wFormatTag`.
    pub format_tag: u16,
    /// `nChannels`.
    pub channels: u16,
    /// `nSamplesPerSec`.
    pub samples_per_sec: u32,
    /// `wBitsPerSample`.
    pub bits_per_sample: u16,
    /// `dwChannelMask`, present only for extensible formats.
    pub channel_mask: Option<u32>,
    /// `SubFormat`, present only for extensible formats.
    pub sub_format: Option<WaveSubFormat>,
}

impl WaveFormat {
    /// Plain PCM integer format.
    pub fn pcm(channels: u16, samples_per_sec: u32, bits_per_sample: u16) -> Self {
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            samples_per_sec,
            bits_per_sample,
            channel_mask: None,
            sub_format: None,
        }
    }

    /// Extensible format, as shared-mode render clients usually negotiate.
    pub fn extensible(
        channels: u16,
        samples_per_sec: u32,
        bits_per_sample: u16,
        channel_mask: u32,
        sub_format: WaveSubFormat,
    ) -> Self {
        Self {
            format_tag: WAVE_FORMAT_EXTENSIBLE,
            channels,
            samples_per_sec,
            bits_per_sample,
            channel_mask: Some(channel_mask),
            sub_format: Some(sub_format),
        }
    }

    /// Returns `true` for `WAVE_FORMAT_EXTENSIBLE`.
    pub fn is_extensible(&self) -> bool {
        self.format_tag == WAVE_FORMAT_EXTENSIBLE
    }

    /// Bytes per frame (`nBlockAlign`).
    pub fn block_align(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    fn is_float(&self) -> bool {
        match self.format_tag {
            WAVE_FORMAT_IEEE_FLOAT => true,
            WAVE_FORMAT_EXTENSIBLE => self.sub_format == Some(WaveSubFormat::IeeeFloat),
            _ => false,
        }
    }

    fn sample_format(&self) -> SampleFormat {
        if self.is_float() {
            return match self.bits_per_sample {
                32 => SampleFormat::F32,
                _ => SampleFormat::Unknown,
            };
        }
        match self.bits_per_sample {
            8 => SampleFormat::U8,
            16 => SampleFormat::I16,
            32 => SampleFormat::I32,
            _ => SampleFormat::Unknown,
        }
    }

    fn channel_layout(&self) -> ChannelLayout {
        if self.is_extensible() {
            let by_mask = match self.channel_mask {
                Some(MASK_2POINT1) => Some(ChannelLayout::TwoPointOne),
                Some(MASK_SURROUND) => Some(ChannelLayout::FourPointZero),
                Some(MASK_4POINT1) => Some(ChannelLayout::FourPointOne),
                Some(MASK_5POINT1_SURROUND) => Some(ChannelLayout::FivePointOne),
                Some(MASK_7POINT1_SURROUND) => Some(ChannelLayout::SevenPointOne),
                _ => None,
            };
            if let Some(layout) = by_mask {
                return layout;
            }
        }
        ChannelLayout::from_channel_count(self.channels)
    }

    /// Maps this descriptor to the format carried on the wire.
    ///
    /// Unrepresentable encodings map to [`SampleFormat::Unknown`] or
    /// [`ChannelLayout::Unknown`]; check [`AudioFormat::is_supported`].
    pub fn to_audio_format(&self) -> AudioFormat {
        AudioFormat::new(
            self.sample_format(),
            self.channel_layout(),
            self.samples_per_sec,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_16_stereo() {
        let format = WaveFormat::pcm(2, 44100, 16).to_audio_format();
        assert_eq!(
            format,
            AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44100)
        );
    }

    #[test]
    fn test_plain_float_tag() {
        let wave = WaveFormat {
            format_tag: WAVE_FORMAT_IEEE_FLOAT,
            ..WaveFormat::pcm(1, 48000, 32)
        };
        let format = wave.to_audio_format();
        assert_eq!(format.sample_format, SampleFormat::F32);
        assert_eq!(format.channel_layout, ChannelLayout::Mono);
    }

    #[test]
    fn test_extensible_float_five_one() {
        let wave = WaveFormat::extensible(6, 48000, 32, MASK_5POINT1_SURROUND, WaveSubFormat::IeeeFloat);
        let format = wave.to_audio_format();
        assert_eq!(format.sample_format, SampleFormat::F32);
        assert_eq!(format.channel_layout, ChannelLayout::FivePointOne);
        assert_eq!(format.sample_rate, 48000);
    }

    #[test]
    fn test_extensible_masks() {
        let layout = |mask, channels| {
            WaveFormat::extensible(channels, 48000, 16, mask, WaveSubFormat::Pcm)
                .to_audio_format()
                .channel_layout
        };
        assert_eq!(layout(MASK_2POINT1, 3), ChannelLayout::TwoPointOne);
        assert_eq!(layout(MASK_SURROUND, 4), ChannelLayout::FourPointZero);
        assert_eq!(layout(MASK_4POINT1, 5), ChannelLayout::FourPointOne);
        assert_eq!(layout(MASK_7POINT1_SURROUND, 8), ChannelLayout::SevenPointOne);
        // Unknown mask falls back to the channel count
        assert_eq!(layout(0x3, 2), ChannelLayout::Stereo);
    }

    #[test]
    fn test_extensible_pcm_24_bit_unsupported() {
        let wave = WaveFormat::extensible(2, 48000, 24, 0x3, WaveSubFormat::Pcm);
        let format = wave.to_audio_format();
        assert_eq!(format.sample_format, SampleFormat::Unknown);
        assert!(!format.is_supported());
    }

    #[test]
    fn test_float_with_other_subformat_is_integer() {
        let wave = WaveFormat::extensible(2, 48000, 32, 0x3, WaveSubFormat::Other);
        assert_eq!(wave.to_audio_format().sample_format, SampleFormat::I32);
    }
}
