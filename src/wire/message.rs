//! Message header and codec.

use super::HEADER_LEN;
use crate::error::WireError;
use crate::format::{AudioFormat, ChannelLayout, SampleFormat};

/// Everything a receiver needs to place a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Format of the payload.
    pub format: AudioFormat,
    /// Frames in the payload.
    pub frame_count: u32,
    /// Wall-clock time of the first frame, ns since the UNIX epoch.
    pub timestamp: u64,
}

impl MessageHeader {
    /// Payload length this header promises.
    pub fn payload_len(&self) -> usize {
        self.frame_count as usize * self.format.block_align()
    }

    /// Appends the encoded header to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.format.channel_layout.code().to_le_bytes());
        out.extend_from_slice(&self.format.sample_format.code().to_le_bytes());
        out.extend_from_slice(&self.format.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.frame_count.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
    }

    /// Parses a header from the first [`HEADER_LEN`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let Some(header) = bytes.get(..HEADER_LEN) else {
            return Err(WireError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        };

        let u32_at = |at: usize| {
            u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
        };
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&header[16..24]);

        let layout_code = u32_at(0);
        let format_code = u32_at(4);
        let channel_layout = ChannelLayout::from_code(layout_code)
            .ok_or(WireError::UnknownChannelLayout { code: layout_code })?;
        let sample_format = SampleFormat::from_code(format_code)
            .ok_or(WireError::UnknownSampleFormat { code: format_code })?;

        Ok(Self {
            format: AudioFormat::new(sample_format, channel_layout, u32_at(8)),
            frame_count: u32_at(12),
            timestamp: u64::from_le_bytes(timestamp),
        })
    }
}

/// A decoded message borrowing its payload from the delivery buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMessage<'a> {
    /// Parsed header.
    pub header: MessageHeader,
    /// Raw interleaved samples.
    pub payload: &'a [u8],
}

impl<'a> WireMessage<'a> {
    /// Creates a message, checking the payload length invariant.
    pub fn new(header: MessageHeader, payload: &'a [u8]) -> Result<Self, WireError> {
        let expected = header.payload_len();
        if payload.len() != expected {
            return Err(WireError::PayloadLengthMismatch {
                expected,
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }

    /// Decodes a complete message.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, WireError> {
        let header = MessageHeader::decode(bytes)?;
        Self::new(header, &bytes[HEADER_LEN..])
    }

    /// Encoded length.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Appends the encoded message to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        self.header.encode_into(out);
        out.extend_from_slice(self.payload);
    }

    /// Encodes into a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }
}
