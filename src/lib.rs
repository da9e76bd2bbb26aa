//! # app-audio-capture
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Per-process audio capture with a synchronizing mixer.
//!
//! `app-audio-capture` records what one application renders, rather than the
//! whole system mix. A small probe inside each target process intercepts the
//! audio engine's render calls and ships every committed buffer over a local
//! channel; the consuming process converts each producer's stream to a common
//! format and mixes them onto one timeline, paced by their timestamps.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use app_audio_capture::discovery::{Application, StaticDiscovery};
//! use app_audio_capture::{AppAudioCapture, ChannelSink, OutputChunk};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), app_audio_capture::CaptureError> {
//! // User channel capacity: size based on your consumer's processing speed
//! let (tx, mut rx) = mpsc::channel::<OutputChunk>(32);
//!
//! let discovery = StaticDiscovery::new();
//! discovery.insert("game.exe", Application::new("Game").with_process(4242, true));
//!
//! let session = AppAudioCapture::builder()
//!     .target("game.exe")
//!     .discovery(discovery)
//!     .add_sink(ChannelSink::new(tx))
//!     .on_event(|e| tracing::warn!(?e, "capture event"))
//!     .start()
//!     .await?;
//!
//! // 44.1 kHz stereo f32, one segment at a time
//! while let Some(chunk) = rx.recv().await {
//!     let _ = chunk.frames.len();
//! }
//!
//! session.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate spans two kinds of process:
//!
//! - **Probe** (target process): hooks run on the host's audio thread, copy
//!   nothing at request time, and never wait on the consumer beyond a bounded
//!   number of send attempts
//! - **Transport**: one length-prefixed local channel per producer process
//! - **Pipeline** (consumer process): one receiver task per producer feeds the
//!   [`SyncMixer`]; a single driver task pops due segments to sinks and keeps
//!   the producer set in step with the target application
//!
//! A slow producer never stalls the others: each has its own channel and
//! task, and the mixer only holds a short lock to add frames.

// unsafe_code lint is configured in Cargo.toml as "deny"; the probe's
// region and vtable modules override it.
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod clock;
mod config;
pub mod discovery;
mod error;
mod event;
pub mod format;
mod frame;
pub mod mixer;
pub mod pipeline;
pub mod probe;
mod session;
mod sink;
pub mod transport;
pub mod wire;

pub use builder::{AppAudioCapture, AppAudioCaptureBuilder};
pub use clock::{wall_clock_ns, Clock, ManualClock, SystemClock};
pub use config::{BufferPreset, CaptureConfig, TransportConfig, UpdateRate};
pub use error::{CaptureError, ProbeError, SinkError, WireError};
pub use event::{event_callback, CaptureEvent, DropReason, EventCallback};
pub use frame::{AudioFrame, OutputChunk, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
pub use mixer::SyncMixer;
pub use session::{CaptureSession, SessionStats};
pub use sink::{ChannelSink, Sink};
