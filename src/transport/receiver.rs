//! Consumer-side receiver: a server endpoint drained by its own task.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{ChannelAddress, FrameReader};
use crate::CaptureError;

/// Called with each complete message.
///
/// The slice borrows the receiver's delivery buffer, which is reused for the
/// next message; copy anything that must outlive the call.
pub type DeliveryCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Server end of one producer's channel.
///
/// Binding creates the endpoint and spawns a task that accepts the producer's
/// connection and hands every frame to the callback. A new connection takes
/// over from the current one once it delivers its first frame, which covers
/// a probe reconnecting after a write error. A connection that closes
/// without sending anything, such as another receiver checking whether this
/// one is alive, never disturbs the producer.
///
/// Must be created inside a tokio runtime.
pub struct TransportReceiver {
    address: ChannelAddress,
    delivered: Arc<AtomicU64>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TransportReceiver {
    /// Creates the endpoint at `address` and starts delivering to `callback`.
    ///
    /// Frames larger than `max_message_size` are treated as stream corruption
    /// and drop the connection.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ChannelBind`] if the endpoint cannot be
    /// created, including when another live receiver already owns it.
    pub fn bind<F>(
        address: ChannelAddress,
        max_message_size: usize,
        callback: F,
    ) -> Result<Self, CaptureError>
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let listener = Listener::bind(&address).map_err(|source| CaptureError::ChannelBind {
            name: address.name().to_string(),
            source,
        })?;

        tracing::info!(channel = %address.name(), path = %address, "Receiver bound");

        let delivered = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(
            listener,
            Arc::new(callback),
            max_message_size,
            stop_rx,
            Arc::clone(&delivered),
        ));

        Ok(Self {
            address,
            delivered,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// The address this receiver serves.
    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Number of messages handed to the callback so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Stops delivering and waits for the task to exit.
    ///
    /// Messages still in flight are dropped.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TransportReceiver {
    fn drop(&mut self) {
        // Task exits on its own once the stop signal lands
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for TransportReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportReceiver")
            .field("address", &self.address)
            .field("delivered", &self.delivered())
            .finish_non_exhaustive()
    }
}

enum Step {
    Stop,
    Accepted(io::Result<Connection>),
    Current(io::Result<usize>),
    Candidate(io::Result<usize>),
}

async fn run(
    mut listener: Listener,
    callback: DeliveryCallback,
    max_message_size: usize,
    mut stop_rx: oneshot::Receiver<()>,
    delivered: Arc<AtomicU64>,
) {
    let mut current: Option<FrameReader<Connection>> = None;
    // Newest connection, until it proves itself with a frame
    let mut candidate: Option<FrameReader<Connection>> = None;

    loop {
        let step = tokio::select! {
            _ = &mut stop_rx => Step::Stop,
            accepted = listener.accept() => Step::Accepted(accepted),
            frame = next_frame(&mut current) => Step::Current(frame),
            frame = next_frame(&mut candidate) => Step::Candidate(frame),
        };

        match step {
            Step::Stop => break,
            Step::Accepted(Ok(connection)) => {
                let reader = FrameReader::new(connection, max_message_size);
                if current.is_none() {
                    current = Some(reader);
                } else {
                    candidate = Some(reader);
                }
            }
            Step::Accepted(Err(e)) => {
                tracing::warn!(path = %listener.path, error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Step::Current(Ok(_)) => {
                if let Some(reader) = &current {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    callback(reader.frame());
                }
            }
            Step::Current(Err(e)) => {
                log_closed(&listener.path, &e);
                current = candidate.take();
            }
            Step::Candidate(Ok(_)) => {
                tracing::debug!(path = %listener.path, "Producer reconnected, replacing connection");
                current = candidate.take();
                if let Some(reader) = &current {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    callback(reader.frame());
                }
            }
            Step::Candidate(Err(e)) => {
                log_closed(&listener.path, &e);
                candidate = None;
            }
        }
    }

    listener.close();
    tracing::debug!(path = %listener.path, "Receiver stopped");
}

fn log_closed(path: &str, e: &io::Error) {
    if e.kind() != io::ErrorKind::UnexpectedEof {
        tracing::debug!(path, error = %e, "Dropping producer connection");
    }
}

/// Reads the next frame, or waits forever while the slot is empty.
async fn next_frame(reader: &mut Option<FrameReader<Connection>>) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.next_frame().await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
type Connection = tokio::net::UnixStream;

#[cfg(unix)]
struct Listener {
    inner: tokio::net::UnixListener,
    path: String,
    socket: std::path::PathBuf,
}

#[cfg(unix)]
impl Listener {
    fn bind(address: &ChannelAddress) -> io::Result<Self> {
        let socket = address.path().to_path_buf();
        if socket.exists() {
            // A live receiver answers; a stale file from a crashed one does not
            if std::os::unix::net::UnixStream::connect(&socket).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another receiver is serving this channel",
                ));
            }
            std::fs::remove_file(&socket)?;
        }
        let inner = tokio::net::UnixListener::bind(&socket)?;
        Ok(Self {
            inner,
            path: address.to_string(),
            socket,
        })
    }

    async fn accept(&mut self) -> io::Result<Connection> {
        let (stream, _) = self.inner.accept().await?;
        Ok(stream)
    }

    fn close(&self) {
        let _ = std::fs::remove_file(&self.socket);
    }
}

#[cfg(windows)]
type Connection = tokio::net::windows::named_pipe::NamedPipeServer;

#[cfg(windows)]
struct Listener {
    next: Connection,
    path: String,
}

#[cfg(windows)]
impl Listener {
    fn bind(address: &ChannelAddress) -> io::Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let path = address.to_string();
        let next = ServerOptions::new().first_pipe_instance(true).create(&path)?;
        Ok(Self { next, path })
    }

    async fn accept(&mut self) -> io::Result<Connection> {
        use tokio::net::windows::named_pipe::ServerOptions;

        self.next.connect().await?;
        let fresh = ServerOptions::new().create(&self.path)?;
        Ok(std::mem::replace(&mut self.next, fresh))
    }

    fn close(&self) {}
}
