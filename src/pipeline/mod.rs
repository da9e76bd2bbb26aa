//! Consumer-side pipeline components.
//!
//! Each producer's channel feeds the shared mixer; one driver task drains
//! the mixer to sinks and keeps the producer set in step with the target:
//!
//! ```text
//! receiver task ─▶ decode ─▶ convert ─▶ reconcile ─┐
//! receiver task ─▶ decode ─▶ convert ─▶ reconcile ─┼─▶ SyncMixer ─▶ Driver ─▶ Sinks
//! receiver task ─▶ decode ─▶ convert ─▶ reconcile ─┘
//! ```
//!
//! - **ProducerSession**: one receiver plus its converter and reconciler
//! - **ProducerRegistry**: attaches and detaches sessions as pids come and go
//! - **Driver**: pops due segments, runs discovery, injects new processes
//! - **Output**: fans segments out to sinks with retry logic

mod driver;
mod output;
mod producer;
mod reconcile;
mod registry;

pub(crate) use driver::{Driver, DriverCommand, Injection};
pub(crate) use output::Output;
pub use producer::ProducerSession;
pub use reconcile::{Continuity, Reconciled, Reconciler};
pub use registry::ProducerRegistry;
