//! Client builder and transport state machine.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! The [`IpcClient`] manages the connection lifecycle:
//! 1. Locate the peer's socket
//! 2. Publish `Open` and send the HANDSHAKE frame
//! 3. Read frames and dispatch them (MESSAGE, CLOSE, PING, PONG)
//! 4. Close on request or when the peer goes away
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Closing ─► Disconnected
//!       ▲              │            │
//!       └──────────────┘            └── peer CLOSE / EOF ──► Disconnected
//! ```
//!
//! # Example
//!
//! ```ignore
//! use presence_ipc::{EventKind, IpcClient, Opcode};
//! use serde_json::json;
//!
//! let client = IpcClient::builder("123456789").build();
//! client.on(EventKind::Message, |event| println!("{:?}", event));
//! client.connect().await?;
//! client.send(Opcode::Frame, Some(&json!({ "cmd": "SUBSCRIBE" }))).await?;
//! client.close().await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::error::{IpcError, Result};
use crate::events::{CloseReason, EventBus, EventKind, TransportEvent};
use crate::protocol::{
    build_frame, encode_frame, Frame, FrameBuffer, Opcode, DEFAULT_MAX_PAYLOAD_SIZE,
    PROTOCOL_VERSION,
};
use crate::transport::{Dialer, LocatorConfig, PipeDialer, SocketLocator};
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Default timeout for writing the handshake and for the READY wait.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the peer to acknowledge a local close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each socket read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Lifecycle state of an [`IpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Socket discovery in progress.
    Connecting,
    /// Handshake sent, read loop running.
    Connected,
    /// Local close in progress.
    Closing,
}

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Application identifier sent in the handshake.
    pub client_id: String,
    /// Largest payload accepted from the peer.
    pub max_payload_size: u32,
    /// Capacity of the outbound frame queue.
    pub writer_capacity: usize,
    /// Bound on writing the handshake (and, in the RPC layer, on READY).
    pub handshake_timeout: Duration,
    /// Bound on waiting for the peer to acknowledge a local close.
    pub close_timeout: Duration,
}

impl TransportConfig {
    /// Default settings for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            writer_capacity: DEFAULT_CHANNEL_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// HANDSHAKE payload.
#[derive(Debug, Serialize)]
struct Handshake<'a> {
    v: u32,
    client_id: &'a str,
}

/// Builder for configuring and creating an [`IpcClient`].
pub struct ClientBuilder<D = PipeDialer> {
    config: TransportConfig,
    locator: LocatorConfig,
    dialer: D,
}

impl ClientBuilder<PipeDialer> {
    /// Create a builder using the process environment for discovery.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            config: TransportConfig::new(client_id),
            locator: LocatorConfig::from_env(),
            dialer: PipeDialer,
        }
    }
}

impl<D: Dialer> ClientBuilder<D> {
    /// Replace the discovery inputs.
    pub fn locator_config(mut self, locator: LocatorConfig) -> Self {
        self.locator = locator;
        self
    }

    /// Set the timeout for each socket candidate.
    ///
    /// Default: 2 seconds
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.locator.attempt_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    ///
    /// Default: 10 seconds
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the close acknowledgement timeout.
    ///
    /// Default: 5 seconds
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Set the largest payload accepted from the peer.
    ///
    /// Default: 16 MB
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// Default: 64
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.config.writer_capacity = capacity;
        self
    }

    /// Use a custom dialer for socket discovery.
    pub fn dialer<D2: Dialer>(self, dialer: D2) -> ClientBuilder<D2> {
        ClientBuilder {
            config: self.config,
            locator: self.locator,
            dialer,
        }
    }

    /// Build the client. No connection is made until [`IpcClient::connect`].
    pub fn build(self) -> IpcClient<D> {
        IpcClient {
            config: self.config,
            locator: SocketLocator::new(self.locator, self.dialer),
            shared: Arc::new(Shared::new()),
            op_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }
}

/// One live connection. Replaced, never reused, on reconnect.
struct Connection {
    id: u64,
    writer: WriterHandle,
    /// Set by a local `close()`; the read loop then leaves the close
    /// notification to `close()`.
    closing: AtomicBool,
    /// Guards the single close notification for this connection.
    close_emitted: AtomicBool,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    _writer_task: JoinHandle<Result<()>>,
}

/// State shared between the client and its read loop.
struct Shared {
    events: EventBus,
    state: Mutex<ConnectionState>,
    current: Mutex<Option<Arc<Connection>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn new() -> Self {
        Self {
            events: EventBus::new(),
            state: Mutex::new(ConnectionState::Disconnected),
            current: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn current(&self) -> Option<Arc<Connection>> {
        lock(&self.current).clone()
    }

    /// Terminal step for a connection, whichever side ended it.
    ///
    /// Only the first call per connection has any effect.
    fn finish(&self, conn: &Connection, reason: CloseReason) {
        if conn.close_emitted.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut current = lock(&self.current);
            if current.as_ref().is_some_and(|c| c.id == conn.id) {
                *current = None;
                self.set_state(ConnectionState::Disconnected);
            }
        }

        tracing::info!("Connection closed: {}", reason);
        self.events.publish(&TransportEvent::Close(reason));
    }

    fn report_malformed(&self, error: &IpcError) {
        tracing::warn!("Malformed packet: {}", error);
        self.events
            .publish(&TransportEvent::Debug(format!("malformed packet: {}", error)));
    }
}

/// Client side of the local IPC transport.
///
/// Owns at most one connection at a time. `connect()` and `close()` are
/// serialized; `send()` may be called from any task.
pub struct IpcClient<D = PipeDialer> {
    config: TransportConfig,
    locator: SocketLocator<D>,
    shared: Arc<Shared>,
    op_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl IpcClient<PipeDialer> {
    /// Create a new client builder.
    pub fn builder(client_id: impl Into<String>) -> ClientBuilder<PipeDialer> {
        ClientBuilder::new(client_id)
    }
}

impl<D: Dialer> IpcClient<D> {
    /// Transport settings.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.shared.current().is_some()
    }

    /// Notification registry.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Register a listener for one notification topic.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, listener);
    }

    /// Connect to the peer if not already connected.
    ///
    /// Publishes [`TransportEvent::Open`], writes the HANDSHAKE frame, then
    /// starts the read loop.
    ///
    /// # Errors
    ///
    /// - [`IpcError::ConnectionNotFound`] if no candidate socket connects
    /// - [`IpcError::Io`] / [`IpcError::Timeout`] if the handshake cannot be
    ///   written; a `Close` notification is published in that case
    pub async fn connect(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;

        if self.shared.current().is_some() {
            return Ok(());
        }

        let handshake = encode_frame(
            Opcode::Handshake,
            Some(&Handshake {
                v: PROTOCOL_VERSION,
                client_id: &self.config.client_id,
            }),
        )?;

        self.shared.set_state(ConnectionState::Connecting);
        let (candidate, stream) = match self.locator.locate().await {
            Ok(found) => found,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        tracing::info!("Connected to {}", candidate.path.display());

        let (reader, mut write_half) = tokio::io::split(stream);

        self.shared.set_state(ConnectionState::Connected);
        self.shared.events.publish(&TransportEvent::Open);

        let written = tokio::time::timeout(self.config.handshake_timeout, async {
            write_half.write_all(&handshake).await?;
            write_half.flush().await
        })
        .await;

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(IpcError::Io(e)),
            Err(_) => Some(IpcError::Timeout("handshake")),
        };
        if let Some(e) = failure {
            tracing::error!("Handshake failed: {}", e);
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared
                .events
                .publish(&TransportEvent::Close(CloseReason::new(format!(
                    "handshake failed: {}",
                    e
                ))));
            return Err(e);
        }

        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer_capacity);
        let conn = Arc::new(Connection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            writer,
            closing: AtomicBool::new(false),
            close_emitted: AtomicBool::new(false),
            reader_task: Mutex::new(None),
            _writer_task: writer_task,
        });
        *lock(&self.shared.current) = Some(conn.clone());

        let reader_task = tokio::spawn(read_loop(
            reader,
            FrameBuffer::with_max_payload(self.config.max_payload_size),
            self.shared.clone(),
            conn.clone(),
        ));
        *lock(&conn.reader_task) = Some(reader_task);

        Ok(())
    }

    /// Encode and write one frame.
    ///
    /// # Errors
    ///
    /// [`IpcError::NotConnected`] if there is no live connection; nothing is
    /// written or queued in that case.
    pub async fn send<T>(&self, opcode: Opcode, payload: Option<&T>) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let conn = self.shared.current().ok_or_else(|| {
            tracing::debug!("Dropping {} frame: not connected", opcode);
            IpcError::NotConnected
        })?;

        let frame = encode_frame(opcode, payload)?;
        conn.writer.send(Bytes::from(frame)).await
    }

    /// Send an application message (FRAME opcode).
    pub async fn send_message<T>(&self, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.send(Opcode::Frame, Some(payload)).await
    }

    /// Close the connection gracefully.
    ///
    /// Shuts the write half down, waits (bounded by the close timeout) for
    /// the peer to close its side, then publishes a `Close` notification with
    /// [`CloseReason::local`]. Returns immediately when not connected.
    pub async fn close(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;

        // Closing is only set while the slot still holds this connection.
        let conn = {
            let current = lock(&self.shared.current);
            let Some(conn) = current.clone() else {
                return Ok(());
            };
            conn.closing.store(true, Ordering::Release);
            self.shared.set_state(ConnectionState::Closing);
            conn
        };

        if let Err(e) = conn.writer.shutdown().await {
            tracing::debug!("Writer already stopped: {}", e);
        }

        let reader_task = lock(&conn.reader_task).take();
        if let Some(mut reader_task) = reader_task {
            let acknowledged =
                tokio::time::timeout(self.config.close_timeout, &mut reader_task).await;
            if acknowledged.is_err() {
                tracing::warn!(
                    "Peer did not acknowledge close within {:?}",
                    self.config.close_timeout
                );
                reader_task.abort();
            }
        }

        self.shared.finish(&conn, CloseReason::local());
        Ok(())
    }
}

impl<D> Drop for IpcClient<D> {
    fn drop(&mut self) {
        if let Some(conn) = lock(&self.shared.current).take() {
            if let Some(task) = lock(&conn.reader_task).take() {
                task.abort();
            }
        }
    }
}

/// Main read loop - reads frames and dispatches them until the connection
/// ends.
async fn read_loop<R>(
    mut reader: R,
    mut buffer: FrameBuffer,
    shared: Arc<Shared>,
    conn: Arc<Connection>,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let reason = loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                if let Some(e) = buffer.finish() {
                    shared.report_malformed(&e);
                }
                break CloseReason::new(CloseReason::PEER_MESSAGE);
            }
            Ok(n) => n,
            Err(e) => break CloseReason::new(format!("read failed: {}", e)),
        };

        for decoded in buffer.push(&chunk[..n]) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    shared.report_malformed(&e);
                    continue;
                }
            };

            if let Some(reason) = dispatch_frame(frame, &shared, &conn).await {
                if !conn.closing.load(Ordering::Acquire) {
                    shared.finish(&conn, reason);
                    let _ = conn.writer.shutdown().await;
                }
                return;
            }
        }
    };

    if conn.closing.load(Ordering::Acquire) {
        // close() publishes the notification
        return;
    }
    shared.finish(&conn, reason);
}

/// Handle one inbound frame. Returns the close reason for a CLOSE frame.
async fn dispatch_frame(frame: Frame, shared: &Shared, conn: &Connection) -> Option<CloseReason> {
    tracing::debug!(
        "Received {} frame ({} bytes)",
        frame.opcode,
        frame.payload_len()
    );

    match frame.opcode {
        Opcode::Frame => {
            let payload = frame.payload.unwrap_or(Value::Null);
            shared.events.publish(&TransportEvent::Message(payload));
        }
        Opcode::Close => {
            return Some(CloseReason::from_payload(frame.payload.as_ref()));
        }
        Opcode::Ping => {
            match build_frame(Opcode::Pong, frame.raw_payload()) {
                Ok(pong) => {
                    if let Err(e) = conn.writer.send(Bytes::from(pong)).await {
                        tracing::warn!("Failed to queue PONG: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to build PONG: {}", e),
            }
            shared.events.publish(&TransportEvent::Ping);
        }
        Opcode::Pong | Opcode::Handshake => {}
    }

    None
}
