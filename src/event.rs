//! Runtime events for monitoring capture health.
//!
//! Events are non-fatal notifications. Capture keeps running after any of
//! them - they're for logging and metrics, not error handling.

use std::sync::Arc;

use crate::format::AudioFormat;

/// Why a chunk never reached the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Its timestamp fell outside the mixer's window.
    Overrun,
    /// The message could not be decoded.
    Malformed,
}

/// Runtime events emitted during capture.
///
/// # Example
///
/// ```
/// use app_audio_capture::CaptureEvent;
///
/// fn handle_event(event: CaptureEvent) {
///     match event {
///         CaptureEvent::ProducerAttached { pid } => eprintln!("capturing {pid}"),
///         CaptureEvent::ProducerDetached { pid } => eprintln!("released {pid}"),
///         CaptureEvent::InjectionFailed { pid, reason } => {
///             eprintln!("could not instrument {pid}: {reason}");
///         }
///         CaptureEvent::FormatChanged { pid, previous, current } => {
///             eprintln!("{pid} renegotiated {previous:?} -> {current}");
///         }
///         CaptureEvent::ChunkDropped { pid, reason } => {
///             eprintln!("dropped chunk from {pid}: {reason:?}");
///         }
///         CaptureEvent::SinkError { sink_name, error } => {
///             eprintln!("sink '{sink_name}' error: {error}");
///         }
///         CaptureEvent::DiscoveryFailed { reason } => eprintln!("discovery failed: {reason}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A producer session was created for a newly targeted process.
    ProducerAttached {
        /// Process id of the producer.
        pid: u32,
    },

    /// A producer session was torn down (process exited or was untargeted).
    ProducerDetached {
        /// Process id of the producer.
        pid: u32,
    },

    /// Loading the capture probe into a process failed.
    ///
    /// The process stays targeted but produces no audio. Injection is not
    /// retried for the same process.
    InjectionFailed {
        /// Process that could not be instrumented.
        pid: u32,
        /// Why it failed.
        reason: String,
    },

    /// A producer (re)negotiated its render format.
    ///
    /// Not an error: the session rebuilds its converter and keeps going.
    FormatChanged {
        /// Producer process id.
        pid: u32,
        /// Format before the change, `None` for the first chunk.
        previous: Option<AudioFormat>,
        /// The new format.
        current: AudioFormat,
    },

    /// A chunk was discarded.
    ChunkDropped {
        /// Producer process id.
        pid: u32,
        /// Why it was discarded.
        reason: DropReason,
    },

    /// A sink encountered an error during write.
    ///
    /// The output task retries according to
    /// [`CaptureConfig`](crate::CaptureConfig) settings, then moves on.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// Target discovery returned an error this cycle.
    DiscoveryFailed {
        /// What the discovery source reported.
        reason: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`AppAudioCaptureBuilder::on_event()`].
///
/// [`AppAudioCaptureBuilder::on_event()`]: crate::AppAudioCaptureBuilder::on_event
pub type EventCallback = Arc<dyn Fn(CaptureEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use app_audio_capture::{event_callback, CaptureEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(CaptureEvent::ProducerAttached { pid: 1 });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(CaptureEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
