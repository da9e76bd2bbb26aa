//! Conversion of producer payloads to the mixer's output format.

use std::sync::Arc;

use super::{decode_sample, downmix_to_stereo, AudioFormat, Resampler};
use crate::frame::{AudioFrame, OUTPUT_SAMPLE_RATE};

/// Converts raw payloads in one fixed input format to output frames.
///
/// A converter is bound to a single [`AudioFormat`]. Producer sessions build a
/// fresh one through a [`ConverterFactory`] whenever the producer renegotiates.
///
/// Consecutive payloads form one stream: a converter may carry state from one
/// call to the next, and report through [`lead_ns`](Self::lead_ns) where the
/// next call's output begins relative to its payload.
pub trait FormatConvert: Send {
    /// The format this converter was built for.
    fn input_format(&self) -> AudioFormat;

    /// Converts `frame_count` frames of interleaved `payload` to stereo f32 at
    /// [`OUTPUT_SAMPLE_RATE`].
    ///
    /// Trailing bytes that do not form a whole frame are ignored.
    fn convert(&mut self, payload: &[u8], frame_count: usize) -> Vec<AudioFrame>;

    /// Offset from the start of the next payload to the first frame the next
    /// [`convert`](Self::convert) returns. Zero for stateless converters.
    fn lead_ns(&self) -> i64 {
        0
    }

    /// Drops carried state; the next payload starts a new stream.
    fn reset(&mut self) {}
}

/// Builds a converter for a newly negotiated format.
pub type ConverterFactory = Arc<dyn Fn(AudioFormat) -> Box<dyn FormatConvert> + Send + Sync>;

/// Returns a factory producing [`LinearConverter`]s.
pub fn default_converter_factory() -> ConverterFactory {
    Arc::new(|format| Box::new(LinearConverter::new(format)))
}

/// Decode, downmix, then linear-interpolation resample.
#[derive(Debug)]
pub struct LinearConverter {
    input: AudioFormat,
    resampler: Resampler,
    channel_scratch: Vec<f32>,
    frame_scratch: Vec<AudioFrame>,
}

impl LinearConverter {
    /// Creates a converter for `input`.
    pub fn new(input: AudioFormat) -> Self {
        Self {
            input,
            resampler: Resampler::new(input.sample_rate, OUTPUT_SAMPLE_RATE),
            channel_scratch: Vec::with_capacity(input.channels()),
            frame_scratch: Vec::new(),
        }
    }
}

impl FormatConvert for LinearConverter {
    fn input_format(&self) -> AudioFormat {
        self.input
    }

    fn convert(&mut self, payload: &[u8], frame_count: usize) -> Vec<AudioFrame> {
        if !self.input.is_supported() {
            return Vec::new();
        }

        let block_align = self.input.block_align();
        let sample_size = self.input.sample_format.sample_size();

        self.frame_scratch.clear();
        for block in payload.chunks_exact(block_align).take(frame_count) {
            self.channel_scratch.clear();
            self.channel_scratch.extend(
                block
                    .chunks_exact(sample_size)
                    .map(|bytes| decode_sample(self.input.sample_format, bytes)),
            );
            self.frame_scratch
                .push(downmix_to_stereo(self.input.channel_layout, &self.channel_scratch));
        }

        if self.resampler.is_passthrough() {
            return self.frame_scratch.clone();
        }
        let mut output = Vec::new();
        self.resampler.process(&self.frame_scratch, &mut output);
        output
    }

    fn lead_ns(&self) -> i64 {
        self.resampler.lead_ns()
    }

    fn reset(&mut self) {
        self.resampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn i16_payload(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_stereo_i16_passthrough_rate() {
        let format = AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44100);
        let mut converter = LinearConverter::new(format);

        let out = converter.convert(&i16_payload(&[16384, -16384, 0, 8192]), 2);
        assert_eq!(out, vec![AudioFrame::new(0.5, -0.5), AudioFrame::new(0.0, 0.25)]);
    }

    #[test]
    fn test_mono_f32_is_duplicated() {
        let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Mono, 44100);
        let mut converter = LinearConverter::new(format);
        let payload: Vec<u8> = [0.25f32, -0.75].iter().flat_map(|s| s.to_le_bytes()).collect();

        let out = converter.convert(&payload, 2);
        assert_eq!(out, vec![AudioFrame::splat(0.25), AudioFrame::splat(-0.75)]);
    }

    fn f32_payload(frames: &[(f32, f32)]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|&(l, r)| [l.to_le_bytes(), r.to_le_bytes()])
            .flatten()
            .collect()
    }

    #[test]
    fn test_48k_is_resampled() {
        let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, 48000);
        let mut converter = LinearConverter::new(format);
        let payload = vec![0u8; 480 * 8];

        assert_eq!(converter.convert(&payload, 480).len(), 441);
    }

    #[test]
    fn test_split_payload_matches_single_call() {
        let signal: Vec<(f32, f32)> = (0..3000)
            .map(|i| {
                let t = i as f32 * 0.013;
                (t.sin(), t.cos() * 0.5)
            })
            .collect();

        for rate in [48_000, 22_050, 32_000] {
            let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, rate);
            let whole = LinearConverter::new(format).convert(&f32_payload(&signal), signal.len());

            let mut converter = LinearConverter::new(format);
            let mut pieces = Vec::new();
            for part in signal.chunks(1021) {
                pieces.extend(converter.convert(&f32_payload(part), part.len()));
            }
            assert_eq!(pieces, whole, "{rate} Hz");
        }
    }

    #[test]
    fn test_lead_tracks_held_output() {
        let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, 48_000);
        let mut converter = LinearConverter::new(format);
        assert_eq!(converter.lead_ns(), 0);

        // 100 input frames cover outputs 0..=90; output 91 sits at input
        // position 99.05, so it waits for the next payload
        assert_eq!(converter.convert(&vec![0u8; 100 * 8], 100).len(), 91);
        let lead = converter.lead_ns();
        assert!(lead < 0 && lead > -20_834, "lead {lead}");

        converter.reset();
        assert_eq!(converter.lead_ns(), 0);
    }

    #[test]
    fn test_native_rate_has_no_lead() {
        let mut converter = LinearConverter::new(AudioFormat::new(
            SampleFormat::F32,
            ChannelLayout::Stereo,
            44_100,
        ));
        converter.convert(&vec![0u8; 333 * 8], 333);
        assert_eq!(converter.lead_ns(), 0);
    }

    #[test]
    fn test_frame_count_caps_decoding() {
        let format = AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44100);
        let mut converter = LinearConverter::new(format);

        let out = converter.convert(&i16_payload(&[1, 2, 3, 4, 5, 6]), 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_partial_trailing_frame_ignored() {
        let format = AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44100);
        let mut converter = LinearConverter::new(format);

        let mut payload = i16_payload(&[1, 2]);
        payload.push(0xff);
        assert_eq!(converter.convert(&payload, 2).len(), 1);
    }

    #[test]
    fn test_unsupported_format_yields_nothing() {
        let format = AudioFormat::new(SampleFormat::Unknown, ChannelLayout::Stereo, 44100);
        let mut converter = LinearConverter::new(format);
        assert!(converter.convert(&[0u8; 64], 8).is_empty());
    }

    #[test]
    fn test_factory_binds_format() {
        let factory = default_converter_factory();
        let format = AudioFormat::new(SampleFormat::U8, ChannelLayout::Mono, 22050);
        assert_eq!(factory(format).input_format(), format);
    }
}
