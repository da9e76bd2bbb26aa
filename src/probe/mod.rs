//! In-process capture of a target's rendered audio.
//!
//! The probe sits between a process and its audio engine. An [`Interceptor`]
//! redirects three calls of the render capability into a shared
//! [`CaptureContext`]:
//!
//! ```text
//! host render thread
//!   request-buffer  ─▶ original ─▶ CaptureContext::on_request_buffer  (pointer only)
//!   commit-buffer   ─▶ original ─▶ CaptureContext::on_commit_buffer   (encode + send)
//!   negotiate-format ─▶ original ─▶ CaptureContext::on_negotiate_format
//! ```
//!
//! Backends:
//!
//! - [`SimulatedInterceptor`]: a render endpoint in plain Rust, for tests and demos
//! - `WasapiInterceptor` (Windows): patches the shared-mode render client's vtable

mod context;
mod region;
mod simulated;
#[cfg(windows)]
mod wasapi;

use std::sync::Arc;

use crate::ProbeError;

pub use context::{CaptureContext, ProbeStats};
pub use region::WriteRegion;
pub use simulated::{RenderTable, SimulatedInterceptor, SimulatedRenderer};
#[cfg(windows)]
pub use wasapi::WasapiInterceptor;

/// Redirects a render capability's calls into a [`CaptureContext`].
///
/// Both operations are idempotent: installing twice keeps the first
/// installation, and removing restores the original entries exactly.
pub trait Interceptor: Send {
    /// Redirects the intercepted calls to `context`.
    fn install(&mut self, context: Arc<CaptureContext>) -> Result<(), ProbeError>;

    /// Restores the original entries. A no-op when not installed.
    fn remove(&mut self);

    /// Whether the redirection is currently in place.
    fn is_installed(&self) -> bool;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// An attached probe.
///
/// Attaching never fails: if the render capability cannot be intercepted the
/// process simply stays uninstrumented. The failure is logged once here and
/// never retried.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use app_audio_capture::probe::{CaptureContext, CaptureProbe, SimulatedRenderer};
/// use app_audio_capture::TransportConfig;
///
/// let renderer = SimulatedRenderer::new();
/// let context = Arc::new(CaptureContext::for_current_process(&TransportConfig::default()));
///
/// let mut probe = CaptureProbe::attach(renderer.interceptor(), context);
/// assert!(probe.is_instrumented());
/// probe.detach();
/// assert!(!probe.is_instrumented());
/// ```
pub struct CaptureProbe<I: Interceptor> {
    interceptor: I,
    context: Arc<CaptureContext>,
}

impl<I: Interceptor> CaptureProbe<I> {
    /// Installs `interceptor` against `context`.
    pub fn attach(mut interceptor: I, context: Arc<CaptureContext>) -> Self {
        match interceptor.install(Arc::clone(&context)) {
            Ok(()) => {
                tracing::info!(backend = interceptor.name(), "Capture probe installed");
            }
            Err(e) => {
                tracing::warn!(
                    backend = interceptor.name(),
                    error = %e,
                    "Capture unavailable, process stays uninstrumented"
                );
            }
        }
        Self {
            interceptor,
            context,
        }
    }

    /// Whether the host's render calls are being captured.
    pub fn is_instrumented(&self) -> bool {
        self.interceptor.is_installed()
    }

    /// The context the intercepted calls feed.
    pub fn context(&self) -> &Arc<CaptureContext> {
        &self.context
    }

    /// Restores the host's original render calls.
    pub fn detach(&mut self) {
        if !self.interceptor.is_installed() {
            return;
        }
        self.interceptor.remove();
        tracing::info!(
            backend = self.interceptor.name(),
            stats = ?self.context.stats(),
            "Capture probe removed"
        );
    }
}

impl<I: Interceptor> Drop for CaptureProbe<I> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<I: Interceptor> std::fmt::Debug for CaptureProbe<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureProbe")
            .field("backend", &self.interceptor.name())
            .field("instrumented", &self.is_instrumented())
            .field("context", &self.context)
            .finish()
    }
}
