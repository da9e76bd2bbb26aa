//! Builder pattern for `AppAudioCapture`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::discovery::{Injector, TargetDiscovery};
use crate::format::{default_converter_factory, ConverterFactory};
use crate::mixer::SyncMixer;
use crate::pipeline::{Driver, Injection, Output, ProducerRegistry};
use crate::session::{CaptureSession, SessionState};
use crate::sink::Sink;
use crate::{event_callback, CaptureConfig, CaptureError, CaptureEvent, EventCallback};

/// Channel capacity for driver commands.
/// Commands are rare (target switches and Stop).
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// Builder for configuring and starting capture of one application.
///
/// Use [`AppAudioCapture::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use app_audio_capture::discovery::{Application, StaticDiscovery};
/// use app_audio_capture::{AppAudioCapture, BufferPreset, CaptureConfig, ChannelSink};
/// use tokio::sync::mpsc;
///
/// # async fn demo() -> Result<(), app_audio_capture::CaptureError> {
/// let discovery = StaticDiscovery::new();
/// discovery.insert("game.exe", Application::new("Game").with_process(4242, true));
///
/// let (tx, mut rx) = mpsc::channel(32);
/// let session = AppAudioCapture::builder()
///     .target("game.exe")
///     .discovery(discovery)
///     .config(CaptureConfig::default().with_buffer(BufferPreset::Small))
///     .add_sink(ChannelSink::new(tx))
///     .start()
///     .await?;
///
/// while let Some(chunk) = rx.recv().await {
///     println!("{} frames at {}", chunk.frame_count(), chunk.timestamp);
/// }
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
///
/// [`AppAudioCapture::builder()`]: crate::AppAudioCapture::builder
#[must_use]
pub struct AppAudioCaptureBuilder {
    target: String,
    discovery: Option<Arc<dyn TargetDiscovery>>,
    injection: Option<Injection>,
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    clock: Arc<dyn Clock>,
    converters: ConverterFactory,
    config: CaptureConfig,
}

impl Default for AppAudioCaptureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppAudioCaptureBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            target: String::new(),
            discovery: None,
            injection: None,
            sinks: Vec::new(),
            event_callback: None,
            clock: Arc::new(SystemClock),
            converters: default_converter_factory(),
            config: CaptureConfig::default(),
        }
    }

    /// Name of the application to capture, as keyed by discovery.
    pub fn target(mut self, name: impl Into<String>) -> Self {
        self.target = name.into();
        self
    }

    /// Source of target processes.
    pub fn discovery<D: TargetDiscovery + 'static>(mut self, discovery: D) -> Self {
        self.discovery = Some(Arc::new(discovery));
        self
    }

    /// Loads the probe into newly discovered processes.
    ///
    /// Without an injector the session assumes probes are loaded some other
    /// way and only opens their channels.
    pub fn injector<I: Injector + 'static>(
        mut self,
        injector: I,
        loader: impl Into<PathBuf>,
        payload: impl Into<PathBuf>,
    ) -> Self {
        self.injection = Some(Injection {
            injector: Arc::new(injector),
            loader: loader.into(),
            payload: payload.into(),
        });
        self
    }

    /// Add a sink to receive mixed output.
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include producers attaching, format changes, dropped chunks,
    /// and sink errors.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(CaptureEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Time source for pacing output. Defaults to the system wall clock,
    /// which is what probes stamp chunks with.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the converter used to normalize producer formats.
    pub fn converter_factory(mut self, factory: ConverterFactory) -> Self {
        self.converters = factory;
        self
    }

    /// Set custom capture configuration.
    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), CaptureError> {
        if self.target.trim().is_empty() {
            return Err(CaptureError::EmptyTargetName);
        }
        if self.discovery.is_none() {
            return Err(CaptureError::NoDiscoveryConfigured);
        }
        if self.sinks.is_empty() {
            return Err(CaptureError::NoSinksConfigured);
        }
        if self.config.poll_interval.is_zero() || self.config.update_interval.is_zero() {
            return Err(CaptureError::InvalidConfig {
                reason: "poll and update intervals must be non-zero".to_string(),
            });
        }
        if SyncMixer::frames_for_duration(self.config.buffer_duration) < crate::mixer::SEGMENTS {
            return Err(CaptureError::InvalidConfig {
                reason: format!(
                    "buffer duration {:?} is too short to hold a segment",
                    self.config.buffer_duration
                ),
            });
        }
        if self.config.transport.max_message_size <= crate::wire::HEADER_LEN {
            return Err(CaptureError::InvalidConfig {
                reason: "max message size must exceed the header".to_string(),
            });
        }
        Ok(())
    }

    /// Start capture.
    ///
    /// Returns a [`CaptureSession`] handle to control the capture. Producers
    /// attach on the first discovery pass, which runs immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The target name is empty
    /// - No discovery source or no sinks are configured
    /// - The configuration is inconsistent
    /// - Any sink fails to start
    pub async fn start(self) -> Result<CaptureSession, CaptureError> {
        self.validate()?;
        let Some(discovery) = self.discovery else {
            return Err(CaptureError::NoDiscoveryConfigured);
        };

        let output = Output::new(self.sinks, self.config.clone())
            .with_event_callback(self.event_callback.clone());
        output.start_sinks().await?;

        let mixer = Arc::new(SyncMixer::new(0, Arc::clone(&self.clock)));
        mixer.resize(SyncMixer::frames_for_duration(self.config.buffer_duration));

        let state = Arc::new(SessionState::new());
        let mut registry = ProducerRegistry::new(Arc::clone(&mixer), self.config.transport.clone())
            .with_converter_factory(self.converters)
            .with_state(Arc::clone(&state));
        if let Some(callback) = self.event_callback.clone() {
            registry = registry.with_event_callback(callback);
        }

        let driver = Driver {
            target: self.target,
            discovery,
            injection: self.injection,
            registry,
            mixer: Arc::clone(&mixer),
            output,
            state: Arc::clone(&state),
            config: self.config,
            events: self.event_callback,
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = tokio::spawn(driver.run(cmd_rx));

        Ok(CaptureSession::new(state, mixer, cmd_tx, handle))
    }
}

/// Main entry point for app-audio-capture.
///
/// Use [`AppAudioCapture::builder()`] to start configuring capture.
pub struct AppAudioCapture;

impl AppAudioCapture {
    /// Creates a new builder for configuring capture.
    pub fn builder() -> AppAudioCaptureBuilder {
        AppAudioCaptureBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscovery;
    use crate::sink::ChannelSink;
    use std::time::Duration;

    fn ready() -> AppAudioCaptureBuilder {
        AppAudioCapture::builder()
            .target("game.exe")
            .discovery(StaticDiscovery::new())
            .add_sink(ChannelSink::new(mpsc::channel(1).0))
    }

    #[test]
    fn test_builder_default() {
        let builder = AppAudioCaptureBuilder::new();
        assert!(builder.target.is_empty());
        assert!(builder.sinks.is_empty());
        assert!(builder.discovery.is_none());
    }

    #[test]
    fn test_builder_accepts_complete_config() {
        assert!(ready().validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_empty_target() {
        let result = ready().target("  ").validate();
        assert!(matches!(result, Err(CaptureError::EmptyTargetName)));
    }

    #[test]
    fn test_builder_rejects_no_discovery() {
        let builder = AppAudioCapture::builder()
            .target("game.exe")
            .add_sink(ChannelSink::new(mpsc::channel(1).0));
        assert!(matches!(
            builder.validate(),
            Err(CaptureError::NoDiscoveryConfigured)
        ));
    }

    #[test]
    fn test_builder_rejects_no_sinks() {
        let builder = AppAudioCapture::builder()
            .target("game.exe")
            .discovery(StaticDiscovery::new());
        assert!(matches!(
            builder.validate(),
            Err(CaptureError::NoSinksConfigured)
        ));
    }

    #[test]
    fn test_builder_rejects_tiny_buffer() {
        let config = CaptureConfig {
            buffer_duration: Duration::from_nanos(10),
            ..Default::default()
        };
        assert!(matches!(
            ready().config(config).validate(),
            Err(CaptureError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_builder_stores_injector() {
        let injector = |_: &std::path::Path, _: &std::path::Path, _: u32| true;
        let builder = ready().injector(injector, "inject.exe", "hook.dll");
        let injection = builder.injection.as_ref().unwrap();
        assert_eq!(injection.loader, PathBuf::from("inject.exe"));
        assert_eq!(injection.payload, PathBuf::from("hook.dll"));
    }
}
