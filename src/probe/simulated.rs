//! A render endpoint implemented in plain Rust.
//!
//! [`SimulatedRenderer`] behaves like a shared-mode render client: the
//! "application" negotiates a format, then repeatedly requests a buffer,
//! writes frames into it and commits them. Its three calls dispatch through a
//! swappable [`RenderTable`], which is what [`SimulatedInterceptor`] patches.
//! Tests and demos use it wherever the real audio engine is unavailable.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{CaptureContext, Interceptor, WriteRegion};
use crate::clock::Clock;
use crate::format::WaveFormat;
use crate::ProbeError;

/// Frames the host buffer holds (one second at 48 kHz).
const HOST_BUFFER_FRAMES: usize = 48_000;

/// Request-buffer entry: returns where the next `frames` frames go.
pub(crate) type RequestBufferFn = Arc<dyn Fn(u32) -> Option<WriteRegion> + Send + Sync>;
/// Commit-buffer entry: hands `frames` written frames to the engine.
pub(crate) type CommitBufferFn = Arc<dyn Fn(u32) + Send + Sync>;
/// Negotiate-format entry: (re)initializes the stream.
pub(crate) type NegotiateFormatFn = Arc<dyn Fn(&WaveFormat) + Send + Sync>;

/// The renderer's dispatch table.
///
/// Entries are only reachable through [`SimulatedRenderer`], which runs one
/// render cycle at a time.
#[derive(Clone)]
pub struct RenderTable {
    pub(crate) request_buffer: RequestBufferFn,
    pub(crate) commit_buffer: CommitBufferFn,
    pub(crate) negotiate_format: NegotiateFormatFn,
}

impl RenderTable {
    /// Whether every entry is the same function as in `other`.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.request_buffer, &other.request_buffer)
            && Arc::ptr_eq(&self.commit_buffer, &other.commit_buffer)
            && Arc::ptr_eq(&self.negotiate_format, &other.negotiate_format)
    }
}

impl std::fmt::Debug for RenderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTable").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Host {
    format: Option<WaveFormat>,
    // Only accessed through `as_ptr`/`as_mut_ptr`, which keep handed-out
    // regions valid until the next reallocation.
    buffer: Vec<u8>,
    frames_committed: u64,
}

impl Host {
    #[allow(unsafe_code)]
    fn write(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(self.buffer.len());
        // Safety: both ranges are in bounds and the buffers are distinct.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.buffer.as_mut_ptr(), len) };
    }
}

/// A simulated shared-mode render stream.
///
/// # Example
///
/// ```
/// use app_audio_capture::format::WaveFormat;
/// use app_audio_capture::probe::SimulatedRenderer;
///
/// let renderer = SimulatedRenderer::new();
/// renderer.initialize(WaveFormat::pcm(2, 48_000, 16));
/// assert!(renderer.render(&[0u8; 4 * 480]));
/// assert_eq!(renderer.frames_committed(), 480);
/// ```
///
/// Render and initialize calls are serialized: a region handed out by
/// request-buffer stays valid until its commit returns, whatever other
/// threads do meanwhile.
pub struct SimulatedRenderer {
    table: Arc<RwLock<RenderTable>>,
    host: Arc<Mutex<Host>>,
    cycle: Mutex<()>,
    device_clock: Option<Arc<dyn Clock>>,
    has_render_client: bool,
}

impl SimulatedRenderer {
    /// Creates a renderer with no format negotiated yet.
    pub fn new() -> Self {
        let host = Arc::new(Mutex::new(Host::default()));
        Self {
            table: Arc::new(RwLock::new(original_table(&host))),
            host,
            cycle: Mutex::new(()),
            device_clock: None,
            has_render_client: true,
        }
    }

    /// A renderer whose render capability cannot be obtained.
    ///
    /// Interceptors fail to install against it.
    pub fn without_render_client() -> Self {
        Self {
            has_render_client: false,
            ..Self::new()
        }
    }

    /// Reports `clock` as the device position at each commit.
    ///
    /// Without one, the capture context stamps chunks itself.
    pub fn with_device_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.device_clock = Some(clock);
        self
    }

    /// (Re)initializes the stream with `format`.
    pub fn initialize(&self, format: WaveFormat) {
        let _cycle = self.cycle.lock();
        let negotiate = Arc::clone(&self.table.read().negotiate_format);
        negotiate(&format);
    }

    /// Plays `payload`, interleaved in the negotiated format.
    ///
    /// Returns `false` if no format is negotiated or the payload does not
    /// fit the host buffer. A trailing partial frame is ignored.
    pub fn render(&self, payload: &[u8]) -> bool {
        let _cycle = self.cycle.lock();
        let block_align = match self.host.lock().format {
            Some(format) if format.block_align() > 0 => format.block_align(),
            _ => return false,
        };
        let frames = payload.len() / block_align;
        let len = frames * block_align;
        let Ok(frame_count) = u32::try_from(frames) else {
            return false;
        };

        // Snapshot so the entries run without the table lock held
        let table = self.table.read().clone();
        if (table.request_buffer)(frame_count).is_none() {
            return false;
        }
        self.host.lock().write(&payload[..len]);
        (table.commit_buffer)(frame_count);
        true
    }

    /// Frames the engine has accepted.
    pub fn frames_committed(&self) -> u64 {
        self.host.lock().frames_committed
    }

    /// The format currently negotiated.
    pub fn format(&self) -> Option<WaveFormat> {
        self.host.lock().format
    }

    /// Snapshot of the dispatch table.
    pub fn table(&self) -> RenderTable {
        self.table.read().clone()
    }

    /// An interceptor for this renderer's dispatch table.
    pub fn interceptor(&self) -> SimulatedInterceptor {
        SimulatedInterceptor {
            table: self
                .has_render_client
                .then(|| Arc::clone(&self.table)),
            host: Arc::clone(&self.host),
            device_clock: self.device_clock.clone(),
            originals: None,
        }
    }
}

impl Default for SimulatedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRenderer")
            .field("format", &self.format())
            .field("frames_committed", &self.frames_committed())
            .finish_non_exhaustive()
    }
}

#[allow(unsafe_code)]
fn original_table(host: &Arc<Mutex<Host>>) -> RenderTable {
    let request_host = Arc::clone(host);
    let commit_host = Arc::clone(host);
    let negotiate_host = Arc::clone(host);
    RenderTable {
        request_buffer: Arc::new(move |frames| {
            let host = request_host.lock();
            let block_align = host.format?.block_align();
            if frames as usize * block_align > host.buffer.len() {
                return None;
            }
            // Negotiate-format is the only reallocation, and the renderer
            // never runs it between a request and its commit.
            Some(unsafe { WriteRegion::from_raw(host.buffer.as_ptr()) })
        }),
        commit_buffer: Arc::new(move |frames| {
            commit_host.lock().frames_committed += u64::from(frames);
        }),
        negotiate_format: Arc::new(move |format| {
            let mut host = negotiate_host.lock();
            host.format = Some(*format);
            host.buffer = vec![0u8; HOST_BUFFER_FRAMES * format.block_align()];
        }),
    }
}

/// Patches a [`SimulatedRenderer`]'s dispatch table.
///
/// Each hook calls the original entry first, then forwards to the context,
/// mirroring how a vtable patch wraps the real render client.
pub struct SimulatedInterceptor {
    table: Option<Arc<RwLock<RenderTable>>>,
    host: Arc<Mutex<Host>>,
    device_clock: Option<Arc<dyn Clock>>,
    originals: Option<RenderTable>,
}

impl Interceptor for SimulatedInterceptor {
    fn install(&mut self, context: Arc<CaptureContext>) -> Result<(), ProbeError> {
        if self.originals.is_some() {
            return Ok(());
        }
        let Some(table) = &self.table else {
            return Err(ProbeError::CapabilityUnavailable {
                reason: "renderer exposes no render client".to_string(),
            });
        };

        // A stream negotiated before install is picked up now
        if let Some(format) = self.host.lock().format {
            context.on_negotiate_format(format.to_audio_format());
        }

        let mut table = table.write();
        let originals = table.clone();

        let original = Arc::clone(&originals.request_buffer);
        let ctx = Arc::clone(&context);
        table.request_buffer = Arc::new(move |frames| {
            let region = original(frames);
            if let Some(region) = region {
                ctx.on_request_buffer(region);
            }
            region
        });

        let original = Arc::clone(&originals.commit_buffer);
        let ctx = Arc::clone(&context);
        let clock = self.device_clock.clone();
        table.commit_buffer = Arc::new(move |frames| {
            original(frames);
            ctx.on_commit_buffer(frames, clock.as_ref().map(|c| c.now_ns()));
        });

        let original = Arc::clone(&originals.negotiate_format);
        let ctx = context;
        table.negotiate_format = Arc::new(move |format| {
            original(format);
            ctx.on_negotiate_format(format.to_audio_format());
        });

        self.originals = Some(originals);
        Ok(())
    }

    fn remove(&mut self) {
        if let (Some(table), Some(originals)) = (&self.table, self.originals.take()) {
            *table.write() = originals;
        }
    }

    fn is_installed(&self) -> bool {
        self.originals.is_some()
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

impl Drop for SimulatedInterceptor {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::format::{AudioFormat, ChannelLayout, SampleFormat};
    use crate::transport::{ChannelAddress, TransportReceiver};
    use crate::wire::{WireMessage, MAX_MESSAGE_SIZE};
    use crate::transport::TransportSender;
    use crate::TransportConfig;
    use std::time::Duration;

    fn context(dir: &std::path::Path, pid: u32) -> (Arc<CaptureContext>, TransportConfig) {
        let config = TransportConfig {
            socket_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        let context = CaptureContext::new(
            TransportSender::for_pid(pid, &config),
            MAX_MESSAGE_SIZE,
            Arc::new(ManualClock::new(1_000)),
        );
        (Arc::new(context), config)
    }

    #[test]
    fn test_render_without_format_fails() {
        let renderer = SimulatedRenderer::new();
        assert!(!renderer.render(&[0u8; 64]));
        assert_eq!(renderer.frames_committed(), 0);
    }

    #[test]
    fn test_render_oversized_payload_fails() {
        let renderer = SimulatedRenderer::new();
        renderer.initialize(WaveFormat::pcm(1, 48_000, 8));
        assert!(!renderer.render(&vec![0u8; HOST_BUFFER_FRAMES + 1]));
    }

    #[test]
    fn test_install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 11);
        let renderer = SimulatedRenderer::new();
        let mut interceptor = renderer.interceptor();

        interceptor.install(Arc::clone(&ctx)).unwrap();
        let patched = renderer.table();
        interceptor.install(ctx).unwrap();
        assert!(renderer.table().ptr_eq(&patched));
    }

    #[test]
    fn test_remove_restores_exact_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 12);
        let renderer = SimulatedRenderer::new();
        let original = renderer.table();
        let mut interceptor = renderer.interceptor();

        interceptor.install(ctx).unwrap();
        assert!(!Arc::ptr_eq(
            &renderer.table().commit_buffer,
            &original.commit_buffer
        ));

        interceptor.remove();
        assert!(renderer.table().ptr_eq(&original));
        assert!(!interceptor.is_installed());

        // Second remove is a no-op
        interceptor.remove();
        assert!(renderer.table().ptr_eq(&original));
    }

    #[test]
    fn test_install_picks_up_existing_format() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 13);
        let renderer = SimulatedRenderer::new();
        renderer.initialize(WaveFormat::pcm(2, 44_100, 16));

        let mut interceptor = renderer.interceptor();
        interceptor.install(Arc::clone(&ctx)).unwrap();
        assert_eq!(
            ctx.format(),
            Some(AudioFormat::new(SampleFormat::I16, ChannelLayout::Stereo, 44_100))
        );
    }

    #[test]
    fn test_renegotiation_reaches_context() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 14);
        let renderer = SimulatedRenderer::new();
        let mut interceptor = renderer.interceptor();
        interceptor.install(Arc::clone(&ctx)).unwrap();

        renderer.initialize(WaveFormat::pcm(1, 22_050, 8));
        assert_eq!(
            ctx.format(),
            Some(AudioFormat::new(SampleFormat::U8, ChannelLayout::Mono, 22_050))
        );
    }

    #[test]
    fn test_zero_frame_render_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 15);
        let renderer = SimulatedRenderer::new();
        renderer.initialize(WaveFormat::pcm(2, 48_000, 16));
        let mut interceptor = renderer.interceptor();
        interceptor.install(Arc::clone(&ctx)).unwrap();

        assert!(renderer.render(&[]));
        assert_eq!(ctx.stats().zero_frame_skipped, 1);
    }

    #[tokio::test]
    async fn test_intercepted_render_is_sent_with_device_clock() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, config) = context(dir.path(), 16);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let receiver = TransportReceiver::bind(
            ChannelAddress::for_pid(16, &config),
            config.max_message_size,
            move |bytes| {
                let message = WireMessage::decode(bytes).unwrap();
                sink.lock().push((message.header, message.payload.to_vec()));
            },
        )
        .unwrap();

        let device = Arc::new(ManualClock::new(5_000_000));
        let renderer = SimulatedRenderer::new().with_device_clock(device);
        renderer.initialize(WaveFormat::pcm(2, 48_000, 16));
        let mut interceptor = renderer.interceptor();
        interceptor.install(Arc::clone(&ctx)).unwrap();

        let payload: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
        assert!(renderer.render(&payload));
        assert_eq!(renderer.frames_committed(), 100);

        for _ in 0..200 {
            if !received.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let messages = received.lock().clone();
        assert_eq!(messages.len(), 1);
        let (header, bytes) = &messages[0];
        assert_eq!(header.timestamp, 5_000_000);
        assert_eq!(header.frame_count, 100);
        assert_eq!(bytes, &payload);

        receiver.stop().await;
    }

    #[test]
    fn test_concurrent_render_and_initialize_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path(), 17);
        let renderer = Arc::new(SimulatedRenderer::new());
        renderer.initialize(WaveFormat::pcm(2, 48_000, 16));
        let mut interceptor = renderer.interceptor();
        interceptor.install(Arc::clone(&ctx)).unwrap();

        let renders: Vec<_> = (0..2)
            .map(|_| {
                let renderer = Arc::clone(&renderer);
                std::thread::spawn(move || {
                    let payload = vec![0x11u8; 4 * 480];
                    (0..200).filter(|_| renderer.render(&payload)).count() as u64
                })
            })
            .collect();
        let formats = {
            let renderer = Arc::clone(&renderer);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let rate = if i % 2 == 0 { 44_100 } else { 48_000 };
                    renderer.initialize(WaveFormat::pcm(2, rate, 16));
                }
            })
        };

        let rendered: u64 = renders.into_iter().map(|t| t.join().unwrap()).sum();
        formats.join().unwrap();

        assert_eq!(rendered, 400);
        assert_eq!(renderer.frames_committed(), 400 * 480);
        assert_eq!(ctx.stats().commits_seen, 400);
    }
}
