//! Probe-side sender. Synchronous, called from the target's audio thread.

use std::io;
use std::time::Duration;

use super::{write_frame, ChannelAddress};
use crate::config::TransportConfig;

#[cfg(unix)]
type Connection = std::os::unix::net::UnixStream;

#[cfg(windows)]
type Connection = pipe::PipeWriter;

/// Fire-and-forget sender for one producer's channel.
///
/// Connects lazily on the first send and reconnects after any write error.
/// If no receiver is listening, [`send`](Self::send) returns `false`
/// immediately without blocking.
///
/// # Example
///
/// ```
/// use app_audio_capture::TransportConfig;
/// use app_audio_capture::transport::{ChannelAddress, TransportSender};
///
/// let config = TransportConfig::default();
/// let mut sender = TransportSender::new(ChannelAddress::named("nobody-listens", &config), &config);
/// assert!(!sender.send(b"dropped"));
/// ```
#[derive(Debug)]
pub struct TransportSender {
    address: ChannelAddress,
    attempts: u32,
    write_timeout: Duration,
    connection: Option<Connection>,
}

impl TransportSender {
    /// Creates a sender; nothing is opened until the first send.
    pub fn new(address: ChannelAddress, config: &TransportConfig) -> Self {
        Self {
            address,
            attempts: config.send_attempts.max(1),
            write_timeout: config.write_timeout,
            connection: None,
        }
    }

    /// Sender for the channel belonging to process `pid`.
    pub fn for_pid(pid: u32, config: &TransportConfig) -> Self {
        Self::new(ChannelAddress::for_pid(pid, config), config)
    }

    /// The address this sender targets.
    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Sends one message as a length-prefixed frame.
    ///
    /// Returns `true` if the frame was written. Each failed attempt drops the
    /// connection and the next one reconnects; after the configured number
    /// of attempts the message is discarded.
    pub fn send(&mut self, message: &[u8]) -> bool {
        for _ in 0..self.attempts {
            let Some(connection) = self.connection() else {
                // No receiver yet. Try again on the next message.
                return false;
            };
            match write_frame(connection, message) {
                Ok(()) => return true,
                Err(_) => self.connection = None,
            }
        }
        false
    }

    /// Closes the connection, if any.
    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    fn connection(&mut self) -> Option<&mut Connection> {
        if self.connection.is_none() {
            self.connection = open(&self.address, self.write_timeout).ok();
        }
        self.connection.as_mut()
    }
}

#[cfg(unix)]
fn open(address: &ChannelAddress, write_timeout: Duration) -> io::Result<Connection> {
    let stream = std::os::unix::net::UnixStream::connect(address.path())?;
    if !write_timeout.is_zero() {
        stream.set_write_timeout(Some(write_timeout))?;
    }
    Ok(stream)
}

#[cfg(windows)]
fn open(address: &ChannelAddress, write_timeout: Duration) -> io::Result<Connection> {
    pipe::PipeWriter::open(address.path(), write_timeout)
}

/// Client end of a named pipe with a bounded write.
///
/// std's `File` blocks in `WriteFile` until the server drains the pipe. The
/// handle here is opened for overlapped I/O instead, and a write that is not
/// done within the timeout is cancelled and reported as
/// [`io::ErrorKind::TimedOut`].
#[cfg(windows)]
#[allow(unsafe_code)]
mod pipe {
    use std::fs::File;
    use std::io::{self, Write};
    use std::os::windows::fs::OpenOptionsExt;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;
    use std::time::Duration;

    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, ERROR_IO_PENDING, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::Storage::FileSystem::{WriteFile, FILE_FLAG_OVERLAPPED};
    use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
    use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

    pub(super) struct PipeWriter {
        file: File,
        event: HANDLE,
        timeout_ms: u32,
    }

    // The event handle is owned and only used by the thread holding `&mut self`.
    unsafe impl Send for PipeWriter {}

    impl PipeWriter {
        pub(super) fn open(path: &Path, timeout: Duration) -> io::Result<Self> {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .custom_flags(FILE_FLAG_OVERLAPPED.0)
                .open(path)?;
            // Manual reset; WriteFile clears it when each write starts
            let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
                .map_err(io::Error::other)?;
            let timeout_ms = if timeout.is_zero() {
                INFINITE
            } else {
                u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1).max(1)
            };
            Ok(Self {
                file,
                event,
                timeout_ms,
            })
        }

        fn handle(&self) -> HANDLE {
            HANDLE(self.file.as_raw_handle())
        }
    }

    impl Write for PipeWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let handle = self.handle();
            let mut overlapped = OVERLAPPED {
                hEvent: self.event,
                ..Default::default()
            };

            // Safety: `buf` and `overlapped` outlive the I/O; every path
            // below waits for it to finish or be cancelled before returning.
            unsafe {
                if let Err(e) = WriteFile(
                    handle,
                    Some(buf),
                    None,
                    Some(&mut overlapped as *mut OVERLAPPED),
                ) {
                    if e.code() != ERROR_IO_PENDING.to_hresult() {
                        return Err(io::Error::other(e));
                    }
                }

                if WaitForSingleObject(self.event, self.timeout_ms) != WAIT_OBJECT_0 {
                    let _ = CancelIoEx(handle, Some(&overlapped as *const OVERLAPPED));
                    let mut written = 0u32;
                    let _ = GetOverlappedResult(handle, &overlapped, &mut written, true);
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "pipe write did not complete in time",
                    ));
                }

                let mut written = 0u32;
                GetOverlappedResult(handle, &overlapped, &mut written, false)
                    .map_err(io::Error::other)?;
                Ok(written as usize)
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for PipeWriter {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.event);
            }
        }
    }

    impl std::fmt::Debug for PipeWriter {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PipeWriter")
                .field("timeout_ms", &self.timeout_ms)
                .finish_non_exhaustive()
        }
    }
}
