//! Point-to-point local transport between a capture probe and its producer session.
//!
//! One channel per producer process, addressed by
//! [`channel_name(pid)`](crate::wire::channel_name). The consumer side creates
//! the [`TransportReceiver`] first; the probe's [`TransportSender`] connects
//! whenever a receiver exists and silently drops messages otherwise.
//!
//! ```text
//! probe (audio thread) ── u32 len | message ──▶ receiver task ──▶ callback
//! ```
//!
//! Delivery is best effort: a bounded number of write attempts, then the
//! message is dropped. Nothing on the sending side ever waits for the
//! receiver.

mod framing;
mod receiver;
mod sender;

pub use framing::{write_frame, FrameReader};
pub use receiver::{DeliveryCallback, TransportReceiver};
pub use sender::TransportSender;

use std::path::{Path, PathBuf};

use crate::config::TransportConfig;
use crate::wire::channel_name;

/// Where a producer's channel lives on this machine.
///
/// On Unix this is a socket file; on Windows a named pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    name: String,
    path: PathBuf,
}

impl ChannelAddress {
    /// Address of the channel for producer `pid`.
    pub fn for_pid(pid: u32, config: &TransportConfig) -> Self {
        Self::named(channel_name(pid), config)
    }

    /// Address of an arbitrary channel name.
    pub fn named(name: impl Into<String>, config: &TransportConfig) -> Self {
        let name = name.into();
        let path = platform_path(&name, config);
        Self { name, path }
    }

    /// The channel name (prefix + pid).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the socket or pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(unix)]
fn platform_path(name: &str, config: &TransportConfig) -> PathBuf {
    let dir = config.socket_dir.clone().unwrap_or_else(std::env::temp_dir);
    dir.join(format!("{name}.sock"))
}

#[cfg(windows)]
fn platform_path(name: &str, _config: &TransportConfig) -> PathBuf {
    PathBuf::from(format!(r"\\.\pipe\{name}"))
}
