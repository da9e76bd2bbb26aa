//! The session's background task: pacing output and tracking the target.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::output::Output;
use super::registry::ProducerRegistry;
use crate::discovery::{Injector, ProcessInfo, TargetDiscovery};
use crate::mixer::SyncMixer;
use crate::session::SessionState;
use crate::{CaptureConfig, CaptureEvent, EventCallback};

/// Command sent to the driver task.
#[derive(Debug)]
pub(crate) enum DriverCommand {
    /// Switch to another target application.
    SetTarget(String),
    /// Stop the driver gracefully.
    Stop,
}

/// An injector plus the files it loads.
#[derive(Clone)]
pub(crate) struct Injection {
    pub injector: Arc<dyn Injector>,
    pub loader: PathBuf,
    pub payload: PathBuf,
}

pub(crate) struct Driver {
    pub target: String,
    pub discovery: Arc<dyn TargetDiscovery>,
    pub injection: Option<Injection>,
    pub registry: ProducerRegistry,
    pub mixer: Arc<SyncMixer>,
    pub output: Output,
    pub state: Arc<SessionState>,
    pub config: CaptureConfig,
    pub events: Option<EventCallback>,
}

impl Driver {
    fn emit(&self, event: CaptureEvent) {
        if let Some(ref callback) = self.events {
            callback(event);
        }
    }

    /// Pops every due segment into the sinks.
    async fn drain_ready(&self) {
        while self.mixer.ready_to_pop() {
            let chunk = self.mixer.pop();
            self.state.segments_output.fetch_add(1, Ordering::Relaxed);
            if self.output.write_chunk(&chunk).await > 0 {
                self.state
                    .segments_undelivered
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Runs one discovery pass and converges producers onto the target.
    async fn update_targets(&mut self) {
        let discovery = Arc::clone(&self.discovery);
        let apps = match tokio::task::spawn_blocking(move || discovery.refresh()).await {
            Ok(Ok(apps)) => apps,
            Ok(Err(reason)) => {
                tracing::warn!(error = %reason, "Target discovery failed");
                self.emit(CaptureEvent::DiscoveryFailed { reason });
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Target discovery panicked");
                self.emit(CaptureEvent::DiscoveryFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let processes: HashMap<u32, ProcessInfo> = apps
            .get(&self.target)
            .map(|app| app.processes.iter().map(|p| (p.pid, *p)).collect())
            .unwrap_or_default();
        let pids: HashSet<u32> = processes.keys().copied().collect();

        let added = self.registry.target(&pids).await;
        if added.is_empty() {
            return;
        }
        tracing::debug!(target_name = %self.target, added = ?added, "New target processes");

        if let Some(injection) = self.injection.clone() {
            for pid in added {
                let is_64bit = processes.get(&pid).map_or(true, |p| p.is_64bit);
                self.inject(&injection, pid, is_64bit).await;
            }
        }
    }

    async fn inject(&self, injection: &Injection, pid: u32, is_64bit: bool) {
        let Injection {
            injector,
            loader,
            payload,
        } = injection.clone();

        let result =
            tokio::task::spawn_blocking(move || injector.inject(&loader, &payload, pid)).await;

        let reason = match result {
            Ok(true) => {
                tracing::info!(pid, is_64bit, "Probe injected");
                return;
            }
            Ok(false) => "injector reported failure".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(pid, is_64bit, reason = %reason, "Injection failed");
        self.emit(CaptureEvent::InjectionFailed { pid, reason });
    }

    /// Main loop of the session task.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<DriverCommand>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut update = tokio::time::interval(self.config.update_interval);
        update.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(target_name = %self.target, "Capture session started");

        loop {
            tokio::select! {
                _ = poll.tick() => self.drain_ready().await,
                _ = update.tick() => self.update_targets().await,
                cmd = cmd_rx.recv() => match cmd {
                    Some(DriverCommand::SetTarget(name)) => {
                        tracing::info!(target_name = %name, "Target changed");
                        self.target = name;
                        self.update_targets().await;
                    }
                    Some(DriverCommand::Stop) | None => break,
                },
            }
        }

        self.registry.clear().await;
        self.output.stop_sinks().await;
    }
}
