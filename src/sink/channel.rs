//! Tokio mpsc channel sink implementation.

use crate::sink::Sink;
use crate::{OutputChunk, SinkError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// A sink that sends output chunks to a tokio mpsc channel.
///
/// This is the primary way to consume mixed audio (encoding, streaming,
/// analysis). Chunks share their frame buffer, so cloning one into the
/// channel does not copy audio.
///
/// # Example
///
/// ```
/// use app_audio_capture::{ChannelSink, OutputChunk};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<OutputChunk>(100);
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with the AppAudioCapture builder...
/// // Then receive chunks:
/// // while let Some(chunk) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<OutputChunk>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// A full channel applies backpressure to the output task for at most
    /// one segment's play time per attempt; after that the write fails with
    /// [`SinkError::ChannelFull`]. Size it for the consumer's worst-case stall.
    pub fn new(sender: mpsc::Sender<OutputChunk>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<OutputChunk>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, chunk: &OutputChunk) -> Result<(), SinkError> {
        let waited = chunk.duration();
        self.sender
            .send_timeout(chunk.clone(), waited)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SinkError::ChannelFull { waited },
                SendTimeoutError::Closed(_) => SinkError::ChannelClosed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AudioFrame;

    fn chunk(value: f32) -> OutputChunk {
        OutputChunk::new(vec![AudioFrame::splat(value); 3], 42)
    }

    #[tokio::test]
    async fn test_channel_sink_sends_chunks() {
        let (tx, mut rx) = mpsc::channel::<OutputChunk>(10);
        let sink = ChannelSink::new(tx);

        sink.write(&chunk(0.5)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.timestamp, 42);
        assert_eq!(received.frames.as_slice(), &[AudioFrame::splat(0.5); 3]);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<OutputChunk>(10);
        let sink = ChannelSink::new(tx);

        drop(rx);

        let result = sink.write(&chunk(0.0)).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_full_channel_waits_one_segment() {
        let (tx, mut rx) = mpsc::channel::<OutputChunk>(1);
        let sink = ChannelSink::new(tx);
        // 441 frames play for 10 ms
        let segment = OutputChunk::new(vec![AudioFrame::SILENCE; 441], 7);

        sink.write(&segment).await.unwrap();
        let result = sink.write(&segment).await;
        assert!(matches!(
            result,
            Err(SinkError::ChannelFull { waited }) if waited == segment.duration()
        ));

        assert_eq!(rx.recv().await.unwrap().timestamp, 7);
        sink.write(&segment).await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<OutputChunk>(10);
        let sink = ChannelSink::with_name("encoder", tx);
        assert_eq!(sink.name(), "encoder");
    }
}
