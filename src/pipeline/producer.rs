//! Consumer-side state for one producer process.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::reconcile::{Continuity, Reconciler};
use crate::config::TransportConfig;
use crate::event::{CaptureEvent, DropReason, EventCallback};
use crate::format::{AudioFormat, ConverterFactory, FormatConvert};
use crate::mixer::{Placement, SyncMixer};
use crate::session::SessionState;
use crate::transport::{ChannelAddress, TransportReceiver};
use crate::wire::{frames_to_ns, WireMessage};
use crate::CaptureError;

/// Everything a producer's delivery task needs, shared by all producers.
#[derive(Clone)]
pub(crate) struct ProducerShared {
    pub mixer: Arc<SyncMixer>,
    pub converters: ConverterFactory,
    pub events: Option<EventCallback>,
    pub state: Arc<SessionState>,
}

impl ProducerShared {
    fn emit(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.events {
            callback(event);
        }
    }
}

#[derive(Default)]
struct ProducerState {
    converter: Option<Box<dyn FormatConvert>>,
    reconciler: Reconciler,
}

/// Decodes, normalizes, and places one producer's messages.
///
/// Only the producer's delivery task calls [`handle`](Self::handle); the lock
/// exists because the callback is shared, not because it is contended.
pub(crate) struct MessageHandler {
    pid: u32,
    shared: ProducerShared,
    state: Mutex<ProducerState>,
}

impl MessageHandler {
    pub(crate) fn new(pid: u32, shared: ProducerShared) -> Self {
        Self {
            pid,
            shared,
            state: Mutex::new(ProducerState::default()),
        }
    }

    pub(crate) fn handle(&self, bytes: &[u8]) {
        let pid = self.pid;
        self.shared
            .state
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(pid, error = %e, len = bytes.len(), "Dropping malformed message");
                self.shared.state.malformed.fetch_add(1, Ordering::Relaxed);
                self.shared.emit(CaptureEvent::ChunkDropped {
                    pid,
                    reason: DropReason::Malformed,
                });
                return;
            }
        };

        let header = message.header;
        if header.frame_count == 0 {
            return;
        }

        let epsilon_ns = self.shared.mixer.segment_duration().as_nanos() as u64 * 2 / 3;
        let duration_ns = frames_to_ns(u64::from(header.frame_count), header.format.sample_rate);

        let mut state = self.state.lock();
        let current = state.converter.as_ref().map(|c| c.input_format());
        if current != Some(header.format) {
            tracing::info!(pid, format = %header.format, "Producer format negotiated");
            state.converter = Some((self.shared.converters)(header.format));
            state.reconciler.reset();
            self.shared.emit(CaptureEvent::FormatChanged {
                pid,
                previous: current,
                current: header.format,
            });
        }

        let step = state
            .reconciler
            .advance(header.timestamp, duration_ns, epsilon_ns);
        let ProducerState { converter, .. } = &mut *state;
        let Some(converter) = converter.as_mut() else {
            return;
        };
        let (frames, lead_ns) = match step.continuity {
            Continuity::Contiguous => {
                let lead_ns = converter.lead_ns();
                (converter.convert(message.payload, header.frame_count as usize), lead_ns)
            }
            Continuity::Restarted => {
                converter.reset();
                (converter.convert(message.payload, header.frame_count as usize), 0)
            }
            // A late chunk must not disturb the stream state of the in-order ones
            Continuity::OutOfOrder => {
                let mut detached = (self.shared.converters)(header.format);
                (detached.convert(message.payload, header.frame_count as usize), 0)
            }
        };
        drop(state);
        let placed = step.timestamp.saturating_add_signed(lead_ns);

        if frames.is_empty() {
            return;
        }

        match self.shared.mixer.place(placed, &frames) {
            Placement::Mixed { index, frames } => {
                tracing::trace!(pid, index, frames, nominal = header.timestamp, placed, "Chunk placed");
            }
            Placement::Overrun { index } => {
                tracing::trace!(pid, index, placed, "Chunk outside window");
                self.shared.emit(CaptureEvent::ChunkDropped {
                    pid,
                    reason: DropReason::Overrun,
                });
            }
        }
    }

    fn format(&self) -> Option<AudioFormat> {
        self.state.lock().converter.as_ref().map(|c| c.input_format())
    }

    fn last_timestamp(&self) -> Option<u64> {
        self.state.lock().reconciler.last_timestamp()
    }
}

/// A bound receiver plus the per-producer normalization state behind it.
///
/// Created by [`ProducerRegistry`](super::ProducerRegistry) when a target
/// process appears; stopping it removes the channel endpoint.
pub struct ProducerSession {
    pid: u32,
    receiver: TransportReceiver,
    handler: Arc<MessageHandler>,
}

impl ProducerSession {
    pub(crate) fn start(
        pid: u32,
        shared: ProducerShared,
        transport: &TransportConfig,
    ) -> Result<Self, CaptureError> {
        let handler = Arc::new(MessageHandler::new(pid, shared));
        let callback = Arc::clone(&handler);
        let receiver = TransportReceiver::bind(
            ChannelAddress::for_pid(pid, transport),
            transport.max_message_size,
            move |bytes| callback.handle(bytes),
        )?;

        Ok(Self {
            pid,
            receiver,
            handler,
        })
    }

    /// Process id of the producer.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Format of the most recent chunk, once one has arrived.
    pub fn format(&self) -> Option<AudioFormat> {
        self.handler.format()
    }

    /// Placement time of the last in-order chunk.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.handler.last_timestamp()
    }

    /// Messages this producer's channel has delivered.
    pub fn messages_delivered(&self) -> u64 {
        self.receiver.delivered()
    }

    /// Stops the receiver and waits for its task.
    pub async fn stop(self) {
        self.receiver.stop().await;
    }
}

impl std::fmt::Debug for ProducerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSession")
            .field("pid", &self.pid)
            .field("format", &self.format())
            .field("receiver", &self.receiver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::format::{default_converter_factory, ChannelLayout, SampleFormat};
    use crate::frame::AudioFrame;
    use crate::wire::{split_commit, MessageHeader, MAX_MESSAGE_SIZE};
    use std::time::Duration;

    const START: u64 = 2_000_000_000_000;
    const STEREO_44K: AudioFormat =
        AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, 44_100);

    fn shared_with(events: Option<EventCallback>) -> (ProducerShared, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        // 4410 frames per segment
        let mixer = Arc::new(SyncMixer::new(13_230, clock.clone()));
        let shared = ProducerShared {
            mixer,
            converters: default_converter_factory(),
            events,
            state: Arc::new(SessionState::new()),
        };
        (shared, clock)
    }

    fn message(format: AudioFormat, value: f32, frames: u32, timestamp: u64) -> Vec<u8> {
        let samples = frames as usize * format.channels() as usize;
        let payload: Vec<u8> = std::iter::repeat(value.to_le_bytes())
            .take(samples)
            .flatten()
            .collect();
        let header = MessageHeader {
            format,
            frame_count: frames,
            timestamp,
        };
        WireMessage::new(header, &payload).unwrap().to_bytes()
    }

    fn commit(format: AudioFormat, samples: &[f32], timestamp: u64, max_size: usize) -> Vec<Vec<u8>> {
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frames = (samples.len() / format.channels()) as u32;
        split_commit(format, frames, timestamp, &payload, max_size)
            .unwrap()
            .map(|m| m.to_bytes())
            .collect()
    }

    fn collect_events() -> (EventCallback, Arc<Mutex<Vec<CaptureEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: EventCallback = Arc::new(move |e: CaptureEvent| sink.lock().push(e));
        (callback, events)
    }

    #[test]
    fn test_message_is_mixed_at_its_timestamp() {
        let (shared, _clock) = shared_with(None);
        let handler = MessageHandler::new(7, shared.clone());
        let at = shared.mixer.timestamp_for_index(100);

        handler.handle(&message(STEREO_44K, 0.5, 10, at));

        let front = shared.mixer.pop();
        assert_eq!(front.frames[99], AudioFrame::SILENCE);
        assert_eq!(front.frames[100], AudioFrame::splat(0.5));
        assert_eq!(front.frames[109], AudioFrame::splat(0.5));
        assert_eq!(front.frames[110], AudioFrame::SILENCE);
        assert_eq!(shared.state.messages_received.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_malformed_message_counted_and_reported() {
        let (callback, events) = collect_events();
        let (shared, _clock) = shared_with(Some(callback));
        let handler = MessageHandler::new(7, shared.clone());

        handler.handle(&[1, 2, 3]);

        assert_eq!(shared.state.malformed.load(Ordering::Relaxed), 1);
        assert!(matches!(
            events.lock().as_slice(),
            [CaptureEvent::ChunkDropped {
                pid: 7,
                reason: DropReason::Malformed
            }]
        ));
    }

    #[test]
    fn test_format_change_rebuilds_converter_and_reports() {
        let (callback, events) = collect_events();
        let (shared, _clock) = shared_with(Some(callback));
        let handler = MessageHandler::new(9, shared.clone());
        let mono_48k = AudioFormat::new(SampleFormat::F32, ChannelLayout::Mono, 48_000);
        let at = shared.mixer.timestamp_for_index(0);

        handler.handle(&message(STEREO_44K, 0.1, 10, at));
        handler.handle(&message(STEREO_44K, 0.1, 10, at + 226_757));
        handler.handle(&message(mono_48k, 0.1, 10, at + 453_514));

        assert_eq!(handler.format(), Some(mono_48k));
        let changes: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::FormatChanged { previous, current, .. } => Some((*previous, *current)),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![(None, STEREO_44K), (Some(STEREO_44K), mono_48k)]);
    }

    #[test]
    fn test_jittered_chunks_are_contiguous() {
        let (shared, _clock) = shared_with(None);
        let handler = MessageHandler::new(1, shared.clone());
        let t = shared.mixer.timestamp_for_index(1000);
        let delta = frames_to_ns(100, 44_100);

        handler.handle(&message(STEREO_44K, 1.0, 100, t));
        // 1ms late: absorbed
        handler.handle(&message(STEREO_44K, 1.0, 100, t + delta + 1_000_000));

        let front = shared.mixer.pop();
        assert!(front.frames[1000..1200].iter().all(|f| *f == AudioFrame::splat(1.0)));
        assert_eq!(front.frames[1200], AudioFrame::SILENCE);
    }

    #[test]
    fn test_out_of_window_chunk_reports_overrun() {
        let (callback, events) = collect_events();
        let (shared, clock) = shared_with(Some(callback));
        let handler = MessageHandler::new(3, shared.clone());

        let stale = clock.now_ns() - Duration::from_secs(1).as_nanos() as u64;
        handler.handle(&message(STEREO_44K, 1.0, 10, stale));

        assert_eq!(shared.mixer.overruns(), 1);
        assert!(matches!(
            events.lock().last(),
            Some(CaptureEvent::ChunkDropped {
                reason: DropReason::Overrun,
                ..
            })
        ));
    }

    #[test]
    fn test_zero_frame_message_is_ignored() {
        let (shared, _clock) = shared_with(None);
        let handler = MessageHandler::new(1, shared.clone());
        handler.handle(&message(STEREO_44K, 1.0, 0, START));

        assert_eq!(handler.format(), None);
        assert_eq!(shared.mixer.overruns(), 0);
    }

    #[test]
    fn test_split_commit_matches_whole_at_other_rates() {
        for rate in [48_000, 22_050] {
            let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, rate);
            let samples: Vec<f32> = (0..5000 * 2)
                .map(|i| ((i / 2) as f32 * 0.01).sin() * 0.5)
                .collect();

            let (whole, _clock) = shared_with(None);
            let at = whole.mixer.timestamp_for_index(0);
            let handler = MessageHandler::new(1, whole.clone());
            for bytes in commit(format, &samples, at, usize::MAX) {
                handler.handle(&bytes);
            }

            let (split, _clock) = shared_with(None);
            let handler = MessageHandler::new(1, split.clone());
            let chunks = commit(format, &samples, at, MAX_MESSAGE_SIZE);
            assert_eq!(chunks.len(), 4);
            for bytes in chunks {
                handler.handle(&bytes);
            }

            for segment in 0..3 {
                assert_eq!(
                    split.mixer.pop().frames,
                    whole.mixer.pop().frames,
                    "{rate} Hz, segment {segment}"
                );
            }
        }
    }

    #[test]
    fn test_late_chunk_leaves_stream_state_alone() {
        let format = AudioFormat::new(SampleFormat::F32, ChannelLayout::Stereo, 48_000);
        let samples: Vec<f32> = (0..3000 * 2).map(|i| (i / 2) as f32 * 1e-4).collect();

        let (reference, _clock) = shared_with(None);
        let at = reference.mixer.timestamp_for_index(4410);
        let handler = MessageHandler::new(1, reference.clone());
        for bytes in commit(format, &samples, at, MAX_MESSAGE_SIZE) {
            handler.handle(&bytes);
        }

        let (shared, _clock) = shared_with(None);
        let handler = MessageHandler::new(1, shared.clone());
        let chunks = commit(format, &samples, at, MAX_MESSAGE_SIZE);
        handler.handle(&chunks[0]);
        // A stray chunk from before the stream lands in the first segment
        handler.handle(&message(format, 0.25, 10, shared.mixer.timestamp_for_index(0)));
        for bytes in &chunks[1..] {
            handler.handle(bytes);
        }

        assert_eq!(shared.mixer.pop().frames[0], AudioFrame::splat(0.25));
        reference.mixer.pop();
        assert_eq!(shared.mixer.pop().frames, reference.mixer.pop().frames);
    }
}
