//! Fans popped segments out to sinks.

use std::sync::Arc;
use std::time::Duration;

use crate::sink::Sink;
use crate::{CaptureConfig, CaptureError, CaptureEvent, EventCallback, OutputChunk};

/// Writes every output chunk to all sinks, retrying failures with
/// exponential backoff.
///
/// Retries for one segment stop once the next backoff would push the total
/// wait past the segment's own play time, so a stuck sink costs at most one
/// segment of latency per segment and the mixer keeps draining.
pub(crate) struct Output {
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    config: CaptureConfig,
}

impl Output {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: CaptureConfig) -> Self {
        Self {
            sinks,
            event_callback: None,
            config,
        }
    }

    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    fn emit_event(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    /// Returns whether the sink took the segment.
    async fn write_to_sink(&self, sink: &Arc<dyn Sink>, chunk: &OutputChunk) -> bool {
        let budget = chunk.duration();
        let mut waited = Duration::ZERO;
        let mut attempts = 0;
        let mut delay = self.config.sink_retry_delay;

        loop {
            match sink.write(chunk).await {
                Ok(()) => return true,
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        sink = sink.name(),
                        timestamp = chunk.timestamp,
                        frames = chunk.frame_count(),
                        attempt = attempts,
                        error = %e,
                        "Sink rejected segment"
                    );
                    self.emit_event(CaptureEvent::SinkError {
                        sink_name: sink.name().to_string(),
                        error: e.to_string(),
                    });

                    if attempts >= self.config.sink_retry_attempts || waited + delay > budget {
                        tracing::error!(
                            sink = sink.name(),
                            timestamp = chunk.timestamp,
                            attempts,
                            "Segment not delivered"
                        );
                        return false;
                    }

                    tokio::time::sleep(delay).await;
                    waited += delay;
                    delay *= 2;
                }
            }
        }
    }

    /// Writes a chunk to all sinks concurrently and returns how many of
    /// them never took it.
    pub async fn write_chunk(&self, chunk: &OutputChunk) -> usize {
        let futures: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| self.write_to_sink(sink, chunk))
            .collect();

        futures::future::join_all(futures)
            .await
            .into_iter()
            .filter(|delivered| !delivered)
            .count()
    }

    /// Starts all sinks, failing on the first error.
    pub async fn start_sinks(&self) -> Result<(), CaptureError> {
        for sink in &self.sinks {
            sink.on_start()
                .await
                .map_err(|e| CaptureError::SinkStartFailed {
                    sink_name: sink.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Stops all sinks; errors are reported, not returned.
    pub async fn stop_sinks(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_stop().await {
                self.emit_event(CaptureEvent::SinkError {
                    sink_name: sink.name().to_string(),
                    error: format!("Error during shutdown: {e}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioFrame, SinkError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestSink {
        name: String,
        write_count: AtomicUsize,
        fail_count: AtomicUsize,
        fail_start: bool,
    }

    impl TestSink {
        fn new(name: &str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &str, fail_times: usize) -> Self {
            Self {
                name: name.to_string(),
                write_count: AtomicUsize::new(0),
                fail_count: AtomicUsize::new(fail_times),
                fail_start: false,
            }
        }

        fn writes(&self) -> usize {
            self.write_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_start(&self) -> Result<(), SinkError> {
            if self.fail_start {
                return Err(SinkError::custom("no device"));
            }
            Ok(())
        }

        async fn write(&self, _chunk: &OutputChunk) -> Result<(), SinkError> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::custom("intentional failure"));
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // 100 ms of audio
    fn chunk() -> OutputChunk {
        OutputChunk::new(vec![AudioFrame::SILENCE; 4410], 0)
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            sink_retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_output_writes_to_all_sinks() {
        let sink1 = Arc::new(TestSink::new("sink1"));
        let sink2 = Arc::new(TestSink::new("sink2"));

        let output = Output::new(vec![sink1.clone(), sink2.clone()], CaptureConfig::default());
        assert_eq!(output.write_chunk(&chunk()).await, 0);

        assert_eq!(sink1.writes(), 1);
        assert_eq!(sink2.writes(), 1);
    }

    #[tokio::test]
    async fn test_output_retries_on_failure() {
        let sink = Arc::new(TestSink::failing("sink", 2));
        let output = Output::new(vec![sink.clone()], fast_config());

        assert_eq!(output.write_chunk(&chunk()).await, 0);

        assert_eq!(sink.writes(), 1);
    }

    #[tokio::test]
    async fn test_output_gives_up_and_reports() {
        let sink = Arc::new(TestSink::failing("flaky", 10));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        let output = Output::new(vec![sink.clone()], fast_config())
            .with_event_callback(Some(Arc::new(move |e: CaptureEvent| seen.lock().push(e))));

        assert_eq!(output.write_chunk(&chunk()).await, 1);

        assert_eq!(sink.writes(), 0);
        assert_eq!(errors.lock().len(), 3);
        assert!(matches!(
            &errors.lock()[0],
            CaptureEvent::SinkError { sink_name, .. } if sink_name == "flaky"
        ));
    }

    #[tokio::test]
    async fn test_backoff_stays_within_segment() {
        // 10 ms of audio against the default 100 ms first backoff
        let short = OutputChunk::new(vec![AudioFrame::SILENCE; 441], 0);
        let sink = Arc::new(TestSink::failing("slow", 10));
        let healthy = Arc::new(TestSink::new("healthy"));
        let output = Output::new(vec![sink.clone(), healthy.clone()], CaptureConfig::default());

        let started = std::time::Instant::now();
        assert_eq!(output.write_chunk(&short).await, 1);

        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(sink.fail_count.load(Ordering::SeqCst), 9);
        assert_eq!(healthy.writes(), 1);
    }

    #[tokio::test]
    async fn test_retry_delays_fit_in_segment() {
        let sink = Arc::new(TestSink::failing("flaky", 10));
        // 1 + 2 + 4 ms fit in 10 ms, the next 8 ms does not
        let config = CaptureConfig {
            sink_retry_delay: Duration::from_millis(1),
            sink_retry_attempts: 10,
            ..Default::default()
        };
        let output = Output::new(vec![sink.clone()], config);

        let short = OutputChunk::new(vec![AudioFrame::SILENCE; 441], 0);
        assert_eq!(output.write_chunk(&short).await, 1);
        assert_eq!(sink.fail_count.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_start_failure_names_sink() {
        let mut sink = TestSink::new("broken");
        sink.fail_start = true;
        let output = Output::new(vec![Arc::new(sink)], CaptureConfig::default());

        let err = output.start_sinks().await.unwrap_err();
        assert!(matches!(err, CaptureError::SinkStartFailed { sink_name, .. } if sink_name == "broken"));
    }
}
