//! Keyed set of producer sessions sharing one mixer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::producer::{ProducerSession, ProducerShared};
use crate::config::TransportConfig;
use crate::event::{CaptureEvent, EventCallback};
use crate::format::{default_converter_factory, ConverterFactory};
use crate::mixer::SyncMixer;
use crate::session::SessionState;
use crate::CaptureError;

/// Owns one [`ProducerSession`] per producing process.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashSet;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use app_audio_capture::pipeline::ProducerRegistry;
/// use app_audio_capture::{SyncMixer, SystemClock, TransportConfig};
///
/// # async fn demo() {
/// let mixer = Arc::new(SyncMixer::with_duration(
///     Duration::from_millis(480),
///     Arc::new(SystemClock),
/// ));
/// let mut registry = ProducerRegistry::new(mixer, TransportConfig::default());
///
/// let added = registry.target(&HashSet::from([4242, 4243])).await;
/// assert_eq!(added.len(), 2);
///
/// registry.clear().await;
/// # }
/// ```
pub struct ProducerRegistry {
    shared: ProducerShared,
    transport: TransportConfig,
    sessions: HashMap<u32, ProducerSession>,
}

impl ProducerRegistry {
    /// Creates an empty registry feeding `mixer`.
    pub fn new(mixer: Arc<SyncMixer>, transport: TransportConfig) -> Self {
        Self {
            shared: ProducerShared {
                mixer,
                converters: default_converter_factory(),
                events: None,
                state: Arc::new(SessionState::new()),
            },
            transport,
            sessions: HashMap::new(),
        }
    }

    /// Sets the callback that receives producer events.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.shared.events = Some(callback);
        self
    }

    /// Replaces the factory used to build format converters.
    #[must_use]
    pub fn with_converter_factory(mut self, factory: ConverterFactory) -> Self {
        self.shared.converters = factory;
        self
    }

    pub(crate) fn with_state(mut self, state: Arc<SessionState>) -> Self {
        self.shared.state = state;
        self
    }

    /// The mixer all producers feed.
    pub fn mixer(&self) -> &Arc<SyncMixer> {
        &self.shared.mixer
    }

    fn emit(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.shared.events {
            callback(event);
        }
    }

    fn update_count(&self) {
        self.shared
            .state
            .producers
            .store(self.sessions.len() as u64, Ordering::Relaxed);
    }

    /// Binds a receiver for `pid`.
    ///
    /// Returns `Ok(false)` if the producer is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ChannelBind`] if the channel cannot be created.
    pub fn add(&mut self, pid: u32) -> Result<bool, CaptureError> {
        if self.sessions.contains_key(&pid) {
            return Ok(false);
        }

        let session = ProducerSession::start(pid, self.shared.clone(), &self.transport)?;
        self.sessions.insert(pid, session);
        self.update_count();

        tracing::info!(pid, producers = self.sessions.len(), "Producer attached");
        self.emit(CaptureEvent::ProducerAttached { pid });
        Ok(true)
    }

    /// Stops and removes the session for `pid`. Returns whether one existed.
    pub async fn remove(&mut self, pid: u32) -> bool {
        let Some(session) = self.sessions.remove(&pid) else {
            return false;
        };
        self.update_count();
        session.stop().await;

        tracing::info!(pid, producers = self.sessions.len(), "Producer detached");
        self.emit(CaptureEvent::ProducerDetached { pid });
        true
    }

    /// Stops every session.
    pub async fn clear(&mut self) {
        for pid in self.pids() {
            self.remove(pid).await;
        }
    }

    /// Whether `pid` has a session.
    pub fn contains(&self, pid: u32) -> bool {
        self.sessions.contains_key(&pid)
    }

    /// The session for `pid`, if any.
    pub fn get(&self, pid: u32) -> Option<&ProducerSession> {
        self.sessions.get(&pid)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered pids in ascending order.
    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.sessions.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Converges the registry to exactly `pids`.
    ///
    /// Sessions for pids not in the set are stopped; new pids get sessions.
    /// A pid whose channel cannot be bound is logged and left out, so the next
    /// call tries again. Returns the newly added pids in ascending order.
    pub async fn target(&mut self, pids: &HashSet<u32>) -> Vec<u32> {
        let stale: Vec<u32> = self
            .pids()
            .into_iter()
            .filter(|pid| !pids.contains(pid))
            .collect();
        for pid in stale {
            self.remove(pid).await;
        }

        let mut fresh: Vec<u32> = pids
            .iter()
            .copied()
            .filter(|pid| !self.contains(*pid))
            .collect();
        fresh.sort_unstable();

        let mut added = Vec::with_capacity(fresh.len());
        for pid in fresh {
            match self.add(pid) {
                Ok(_) => added.push(pid),
                Err(e) => tracing::warn!(pid, error = %e, "Could not open producer channel"),
            }
        }
        added
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("pids", &self.pids())
            .finish_non_exhaustive()
    }
}
