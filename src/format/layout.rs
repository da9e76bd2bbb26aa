//! Speaker layouts and downmixing to stereo.

use crate::frame::AudioFrame;

/// -3 dB, the gain applied to center and surround channels when folding
/// them into the front pair.
const FOLD_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Speaker arrangement of a render stream.
///
/// Discriminants are the wire codes and equal the channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ChannelLayout {
    /// Not negotiated yet, or not representable.
    #[default]
    Unknown = 0,
    /// One channel.
    Mono = 1,
    /// FL FR.
    Stereo = 2,
    /// FL FR LFE.
    TwoPointOne = 3,
    /// FL FR FC BC.
    FourPointZero = 4,
    /// FL FR FC LFE BC.
    FourPointOne = 5,
    /// FL FR FC LFE SL SR.
    FivePointOne = 6,
    /// FL FR FC LFE BL BR SL SR.
    SevenPointOne = 8,
}

impl ChannelLayout {
    /// Number of interleaved channels. Zero for [`ChannelLayout::Unknown`].
    pub fn channels(&self) -> usize {
        *self as usize
    }

    /// Wire code for this layout.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Parses a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Unknown,
            1 => Self::Mono,
            2 => Self::Stereo,
            3 => Self::TwoPointOne,
            4 => Self::FourPointZero,
            5 => Self::FourPointOne,
            6 => Self::FivePointOne,
            8 => Self::SevenPointOne,
            _ => return None,
        })
    }

    /// Default layout for a plain channel count.
    pub fn from_channel_count(channels: u16) -> Self {
        Self::from_code(u32::from(channels)).unwrap_or(Self::Unknown)
    }
}

/// Folds one interleaved frame in `layout` down to stereo.
///
/// `frame` must hold `layout.channels()` samples. LFE is discarded; center
/// and surround channels are added to both sides at -3 dB.
pub fn downmix_to_stereo(layout: ChannelLayout, frame: &[f32]) -> AudioFrame {
    let at = |i: usize| frame.get(i).copied().unwrap_or(0.0);
    match layout {
        ChannelLayout::Unknown => AudioFrame::SILENCE,
        ChannelLayout::Mono => AudioFrame::splat(at(0)),
        ChannelLayout::Stereo | ChannelLayout::TwoPointOne => AudioFrame::new(at(0), at(1)),
        ChannelLayout::FourPointZero => {
            let shared = FOLD_GAIN * (at(2) + at(3));
            AudioFrame::new(at(0) + shared, at(1) + shared)
        }
        ChannelLayout::FourPointOne => {
            let shared = FOLD_GAIN * (at(2) + at(4));
            AudioFrame::new(at(0) + shared, at(1) + shared)
        }
        ChannelLayout::FivePointOne => {
            let center = FOLD_GAIN * at(2);
            AudioFrame::new(
                at(0) + center + FOLD_GAIN * at(4),
                at(1) + center + FOLD_GAIN * at(5),
            )
        }
        ChannelLayout::SevenPointOne => {
            let center = FOLD_GAIN * at(2);
            AudioFrame::new(
                at(0) + center + FOLD_GAIN * (at(4) + at(6)),
                at(1) + center + FOLD_GAIN * (at(5) + at(7)),
            )
        }
    }
}
