//! Sample encodings and decoding to f32.

/// Encoding of a single sample on the wire.
///
/// Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum SampleFormat {
    /// Not negotiated yet, or not representable.
    #[default]
    Unknown = 0,
    /// Unsigned 8-bit, biased at 128.
    U8 = 1,
    /// Signed 16-bit little-endian.
    I16 = 2,
    /// Signed 32-bit little-endian.
    I32 = 3,
    /// IEEE 754 32-bit float little-endian.
    F32 = 4,
}

impl SampleFormat {
    /// Bytes per sample. Zero for [`SampleFormat::Unknown`].
    pub fn sample_size(&self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
        }
    }

    /// Wire code for this format.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Parses a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::U8),
            2 => Some(Self::I16),
            3 => Some(Self::I32),
            4 => Some(Self::F32),
            _ => None,
        }
    }
}

/// Converts an unsigned 8-bit sample to f32.
#[inline]
pub fn u8_to_f32(sample: u8) -> f32 {
    (f32::from(sample) - 128.0) / 128.0
}

/// Converts i16 samples to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Converts i32 samples to f32.
#[inline]
pub fn i32_to_f32(sample: i32) -> f32 {
    (f64::from(sample) / 2_147_483_648.0) as f32
}

/// Decodes one little-endian sample.
///
/// `bytes` must hold at least `format.sample_size()` bytes; shorter input and
/// [`SampleFormat::Unknown`] decode as silence.
#[inline]
pub fn decode_sample(format: SampleFormat, bytes: &[u8]) -> f32 {
    match (format, bytes) {
        (SampleFormat::U8, [b, ..]) => u8_to_f32(*b),
        (SampleFormat::I16, [a, b, ..]) => i16_to_f32(i16::from_le_bytes([*a, *b])),
        (SampleFormat::I32, [a, b, c, d, ..]) => i32_to_f32(i32::from_le_bytes([*a, *b, *c, *d])),
        (SampleFormat::F32, [a, b, c, d, ..]) => f32::from_le_bytes([*a, *b, *c, *d]),
        _ => 0.0,
    }
}
