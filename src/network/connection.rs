use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::stream_buffer::{StreamBuffer, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_READ_CHUNK_SIZE};
use crate::protocol::{get_framed_bytes, Message, Registry};
use crate::{AppError, AppResult};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection settings handed down from the host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub read_chunk_size: usize,
    pub max_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            read_timeout: None,
            write_timeout: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Timeouts {
    read: Option<Duration>,
    write: Option<Duration>,
}

#[derive(Debug)]
struct ConnectionReader {
    stream: OwnedReadHalf,
    buffer: StreamBuffer,
}

/// A framed TCP connection.
///
/// Reads and writes are locked independently, so one task may `recv` while
/// another `send`s. Frames are decoded through the [`Registry`] passed to
/// [`Connection::recv`].
#[derive(Debug)]
pub struct Connection {
    id: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    reader: Mutex<ConnectionReader>,
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    timeouts: OnceLock<Timeouts>,
    closed: CancellationToken,
    user_data: parking_lot::Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Connection {
    pub fn new(socket: TcpStream, config: &ConnectionConfig) -> AppResult<Connection> {
        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;
        let (read_half, write_half) = socket.into_split();
        let timeouts = OnceLock::new();
        if config.read_timeout.is_some() || config.write_timeout.is_some() {
            let _ = timeouts.set(Timeouts {
                read: config.read_timeout,
                write: config.write_timeout,
            });
        }
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        trace!("connection {} {} -> {}", id, local_addr, peer_addr);
        Ok(Connection {
            id,
            local_addr,
            peer_addr,
            reader: Mutex::new(ConnectionReader {
                stream: read_half,
                buffer: StreamBuffer::new(config.read_chunk_size, config.max_buffer_size),
            }),
            writer: Mutex::new(BufWriter::new(write_half)),
            timeouts,
            closed: CancellationToken::new(),
            user_data: parking_lot::Mutex::new(None),
        })
    }

    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: &ConnectionConfig,
    ) -> AppResult<Connection> {
        let socket = TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        Connection::new(socket, config)
    }

    /// Sets the read and write deadlines used by every later call.
    ///
    /// # Panics
    ///
    /// Panics if deadlines were already set here or at construction.
    pub fn set_timeout(&self, read: Option<Duration>, write: Option<Duration>) {
        if self.timeouts.set(Timeouts { read, write }).is_err() {
            panic!("timeouts of connection {} already set", self.id);
        }
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts.get().copied().unwrap_or_default()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn set_user_data<T: Any + Send + Sync>(&self, data: T) {
        *self.user_data.lock() = Some(Arc::new(data));
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.user_data.lock().clone()?;
        data.downcast::<T>().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Receives the next frame.
    ///
    /// Buffered bytes are tried first. The read deadline covers the whole
    /// call, however many reads it takes to complete the frame.
    pub async fn recv(&self, registry: &Registry) -> AppResult<Box<dyn Message>> {
        let mut reader = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = self.closed.cancelled() => return Err(AppError::ConnectionClosed),
        };
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }
        let ConnectionReader { stream, buffer } = &mut *reader;
        let deadline = self.timeouts().read.map(|d| (Instant::now() + d, d));

        loop {
            match registry.decode_frame(buffer.peek()) {
                Ok((msg, consumed)) => {
                    buffer.consume(consumed);
                    return Ok(msg);
                }
                Err(AppError::Incomplete) => {}
                Err(e) => return Err(e),
            }
            tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(AppError::ConnectionClosed),
                read = with_deadline(deadline, buffer.fill(stream)) => {
                    read?;
                }
            }
        }
    }

    pub async fn send(&self, msg: &dyn Message) -> AppResult<()> {
        let frame = get_framed_bytes(msg);
        self.send_bytes(&frame).await
    }

    /// Writes already framed bytes, flushing before returning.
    pub async fn send_bytes(&self, frame: &[u8]) -> AppResult<()> {
        let mut writer = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.closed.cancelled() => return Err(AppError::ConnectionClosed),
        };
        if self.is_closed() {
            return Err(AppError::ConnectionClosed);
        }
        let deadline = self.timeouts().write.map(|d| (Instant::now() + d, d));
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await?;
            Ok::<_, AppError>(())
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(AppError::ConnectionClosed),
            res = with_deadline(deadline, write) => res,
        }
    }

    /// Closes the connection. Blocked and later `recv`/`send` calls return
    /// [`AppError::ConnectionClosed`]. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown connection {} to {}: {}", self.id, self.peer_addr, e);
        }
    }
}

async fn with_deadline<T, F>(deadline: Option<(Instant, Duration)>, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match deadline {
        Some((at, timeout)) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| AppError::Timeout(timeout))?,
        None => fut.await,
    }
}
