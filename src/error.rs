//! Error types for app-audio-capture.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`CaptureError`]): Prevent a capture session or receiver from starting
//! - **Recoverable events**: Runtime drops surfaced via [`EventCallback`](crate::EventCallback)
//!
//! Everything that happens on the audio path degrades to a counted drop. Only
//! setup can fail loudly.

/// Fatal errors that prevent capture from starting.
///
/// These errors are returned from [`AppAudioCaptureBuilder::start()`] and
/// [`TransportReceiver::bind()`]. Runtime problems (a producer vanishing,
/// ring overruns, malformed chunks) are reported through the event callback
/// instead.
///
/// [`AppAudioCaptureBuilder::start()`]: crate::AppAudioCaptureBuilder::start
/// [`TransportReceiver::bind()`]: crate::transport::TransportReceiver::bind
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No target discovery source was configured.
    #[error("no target discovery configured - call discovery() before start()")]
    NoDiscoveryConfigured,

    /// No sinks were configured before starting.
    #[error("no sinks configured - add at least one sink")]
    NoSinksConfigured,

    /// The target application name is empty.
    #[error("target application name is empty")]
    EmptyTargetName,

    /// The receiving end of a transport channel could not be created.
    #[error("failed to bind channel '{name}': {source}")]
    ChannelBind {
        /// Channel name that failed to bind.
        name: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors are recoverable - the output pump emits a
/// [`CaptureEvent::SinkError`] and retries with backoff for as long as the
/// segment would take to play.
///
/// [`CaptureEvent::SinkError`]: crate::CaptureEvent::SinkError
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The receiving channel stayed full for a whole segment.
    #[error("channel full for {waited:?}")]
    ChannelFull {
        /// How long the write waited for room.
        waited: std::time::Duration,
    },

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }
}

/// A wire message that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Fewer bytes than a full header.
    #[error("message truncated: {len} bytes, header needs {needed}")]
    Truncated {
        /// Bytes received.
        len: usize,
        /// Bytes required.
        needed: usize,
    },

    /// The sample format code is not one we can decode.
    #[error("unknown sample format code {code}")]
    UnknownSampleFormat {
        /// Raw code from the header.
        code: u32,
    },

    /// The channel layout code is not one we can decode.
    #[error("unknown channel layout code {code}")]
    UnknownChannelLayout {
        /// Raw code from the header.
        code: u32,
    },

    /// Payload size disagrees with `frame_count × block_align`.
    #[error("payload is {actual} bytes, header describes {expected}")]
    PayloadLengthMismatch {
        /// Size implied by the header.
        expected: usize,
        /// Size actually present.
        actual: usize,
    },

    /// A frame or message exceeds the configured maximum.
    #[error("message of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Offending length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Failure to intercept the render capability inside a target process.
///
/// Never fatal: the probe logs it once and the process runs uninstrumented.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The render capability object could not be obtained.
    #[error("render capability unavailable: {reason}")]
    CapabilityUnavailable {
        /// Why it was unavailable.
        reason: String,
    },

    /// Redirecting a dispatch slot failed.
    #[error("failed to patch slot {slot}: {reason}")]
    PatchFailed {
        /// Slot index or name.
        slot: String,
        /// Underlying reason.
        reason: String,
    },

    /// Another interceptor already owns the dispatch table.
    #[error("interception already installed by another probe")]
    AlreadyInstalled,
}
