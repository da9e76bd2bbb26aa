//! Sink trait and implementations for audio destinations.
//!
//! A [`Sink`] is any destination that can receive mixed output. The crate
//! provides [`ChannelSink`], which forwards chunks to a tokio mpsc channel.
//!
//! Implement the [`Sink`] trait for other destinations like an encoder,
//! a media pipeline, or a network stream.

mod channel;

pub use channel::ChannelSink;

use crate::{OutputChunk, SinkError};
use async_trait::async_trait;

/// A destination for audio data.
///
/// Sinks receive one [`OutputChunk`] per mixer segment, in timestamp order,
/// and process it (encode, send over network, forward to a channel, etc.).
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability (`Mutex`, `RwLock`) if needed
/// - All methods are async and run on the tokio runtime
/// - `on_start` is called before any audio flows; open resources here
/// - `on_stop` is called during graceful shutdown; close resources here
/// - `write` may be called concurrently with retries; ensure thread safety
///
/// # Example
///
/// ```
/// use app_audio_capture::{OutputChunk, Sink, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink {
///     name: String,
/// }
///
/// #[async_trait]
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     async fn write(&self, chunk: &OutputChunk) -> Result<(), SinkError> {
///         println!("Received {} frames", chunk.frame_count());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before streaming begins.
    ///
    /// Use this to open encoders, establish connections, or allocate resources.
    /// Errors here are fatal and will prevent the session from starting.
    ///
    /// Default implementation does nothing.
    async fn on_start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Write one segment of mixed output.
    ///
    /// Segments arrive at the mixer's real-time cadence; a slow write delays
    /// the next pop, so hand heavy work off to another task.
    ///
    /// Errors are recoverable - the session will emit a [`CaptureEvent::SinkError`]
    /// and may retry based on [`CaptureConfig`] settings.
    ///
    /// [`CaptureEvent::SinkError`]: crate::CaptureEvent::SinkError
    /// [`CaptureConfig`]: crate::CaptureConfig
    async fn write(&self, chunk: &OutputChunk) -> Result<(), SinkError>;

    /// Called during graceful shutdown.
    ///
    /// Use this to flush buffers, close connections, or clean up resources.
    /// This is called even if errors occurred during streaming.
    ///
    /// Default implementation does nothing.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
