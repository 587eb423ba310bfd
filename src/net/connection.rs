//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Accumulate partial reads and feed them to the request parser
//! - Enforce the request timeout (408) and the idle timeout (close)
//! - Dispatch to the response creator and write the full response
//! - Decide per request cycle whether the connection persists
//! - Track live connections for the listener and close them on demand
//!
//! # State Transitions
//! ```text
//! Accepting → ReadingRequest → Dispatching → WritingResponse
//!     WritingResponse → IdleWaiting → ReadingRequest   (persistent)
//!     WritingResponse → Closed                          (not persistent)
//!     IdleWaiting → Closed                              (idle timeout)
//!     any → Closed                                      (socket error, EOF)
//! ```

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use http::header::CONNECTION;
use http::{StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Sleep};
use uuid::Uuid;

use crate::http::{HttpRequest, ParseStatus, RequestParser, ResponseCreator};
use crate::observability::metrics;

/// Size of a single socket read.
const READ_CHUNK: usize = 32 * 1024;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a request cycle is being answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A complete, valid request.
    Request,
    /// The request could not be completed; answer with a stock response.
    Stock(StatusCode),
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket handed over by the listener.
    Accepting,
    /// Waiting for the rest of the current request.
    ReadingRequest,
    /// Producing the response for the current cycle.
    Dispatching(Dispatch),
    /// Sending `output`; `persistent` decides what follows.
    WritingResponse {
        /// Serialized response.
        output: Vec<u8>,
        /// Whether to keep the connection after the write.
        persistent: bool,
    },
    /// Persistent connection waiting for the next request.
    IdleWaiting,
    /// Connection is closed.
    Closed,
}

/// Decide whether the connection stays open after answering `request`.
///
/// | Version   | `Connection`            | Result     |
/// |-----------|-------------------------|------------|
/// | HTTP/1.0  | contains `keep-alive`   | persistent |
/// | HTTP/1.0  | anything else or absent | close      |
/// | HTTP/1.1  | contains `close`        | close      |
/// | HTTP/1.1  | anything else or absent | persistent |
/// | unknown   | n/a                     | close      |
pub fn is_persistent(request: &HttpRequest) -> bool {
    let has_token = |token: &str| {
        request
            .context()
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };

    match request.version() {
        Some(Version::HTTP_10) => has_token("keep-alive"),
        Some(Version::HTTP_11) => !has_token("close"),
        _ => false,
    }
}

/// Timer that is either armed toward one expiry or disarmed.
#[derive(Debug, Default)]
struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    /// Arm for `timeout` from now, replacing any pending expiry.
    fn arm(&mut self, timeout: Duration) {
        self.sleep = Some(Box::pin(time::sleep(timeout)));
    }

    fn disarm(&mut self) {
        self.sleep = None;
    }

    fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the armed deadline passes; never resolves while disarmed.
    async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}

/// Timeouts and limits shared by every connection of a listener.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Time allowed to receive one complete request.
    pub request_timeout: Duration,
    /// Time a persistent connection may sit idle between requests.
    pub idle_timeout: Duration,
    /// Largest accepted request body.
    pub max_body_size: usize,
}

/// A control connection driven through [`ConnectionState`].
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    creator: Box<dyn ResponseCreator>,
    settings: ConnectionSettings,
    read_buffer: Box<[u8]>,
    receive_buffer: Vec<u8>,
    parser: RequestParser,
    request: HttpRequest,
    request_id: Uuid,
    request_timer: Deadline,
    idle_timer: Deadline,
    _guard: ConnectionGuard,
}

impl Connection {
    /// Wrap an accepted socket.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        creator: Box<dyn ResponseCreator>,
        settings: ConnectionSettings,
        guard: ConnectionGuard,
    ) -> Self {
        let request = creator.create_new_request();
        Self {
            id: guard.id(),
            peer,
            stream,
            creator,
            settings,
            read_buffer: vec![0u8; READ_CHUNK].into_boxed_slice(),
            receive_buffer: Vec::new(),
            parser: RequestParser::new(settings.max_body_size),
            request,
            request_id: Uuid::new_v4(),
            request_timer: Deadline::default(),
            idle_timer: Deadline::default(),
            _guard: guard,
        }
    }

    /// Drive the state machine until the connection closes.
    pub async fn run(mut self) {
        let mut state = ConnectionState::Accepting;
        while state != ConnectionState::Closed {
            state = self.step(state).await;
        }
        let _ = self.stream.shutdown().await;
        tracing::debug!(connection_id = %self.id, peer_addr = %self.peer, "Connection closed");
    }

    /// Apply one transition.
    async fn step(&mut self, state: ConnectionState) -> ConnectionState {
        match state {
            ConnectionState::Accepting => {
                tracing::debug!(connection_id = %self.id, peer_addr = %self.peer, "Connection accepted");
                self.request_timer.arm(self.settings.request_timeout);
                ConnectionState::ReadingRequest
            }
            ConnectionState::ReadingRequest => self.read_request().await,
            ConnectionState::Dispatching(dispatch) => self.dispatch(dispatch),
            ConnectionState::WritingResponse { output, persistent } => {
                self.write_response(&output, persistent).await
            }
            ConnectionState::IdleWaiting => self.wait_idle().await,
            ConnectionState::Closed => ConnectionState::Closed,
        }
    }

    async fn read_request(&mut self) -> ConnectionState {
        tokio::select! {
            read = self.stream.read(&mut self.read_buffer[..]) => match read {
                Ok(0) => {
                    tracing::debug!(connection_id = %self.id, "Peer closed connection mid-request");
                    ConnectionState::Closed
                }
                Ok(n) => self.consume(n),
                Err(e) if is_transient(&e) => ConnectionState::ReadingRequest,
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "Read failed");
                    ConnectionState::Closed
                }
            },
            _ = self.request_timer.expired() => {
                tracing::debug!(
                    connection_id = %self.id,
                    timeout_ms = self.settings.request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                ConnectionState::Dispatching(Dispatch::Stock(StatusCode::REQUEST_TIMEOUT))
            }
        }
    }

    async fn wait_idle(&mut self) -> ConnectionState {
        tokio::select! {
            read = self.stream.read(&mut self.read_buffer[..]) => match read {
                Ok(0) => ConnectionState::Closed,
                Ok(n) => {
                    self.idle_timer.disarm();
                    self.request_timer.arm(self.settings.request_timeout);
                    self.consume(n)
                }
                Err(e) if is_transient(&e) => ConnectionState::IdleWaiting,
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "Read failed while idle");
                    ConnectionState::Closed
                }
            },
            _ = self.idle_timer.expired() => {
                tracing::debug!(connection_id = %self.id, "Idle timeout, closing persistent connection");
                ConnectionState::Closed
            }
        }
    }

    /// Append the first `n` bytes of the read buffer and advance the parser.
    fn consume(&mut self, n: usize) -> ConnectionState {
        self.receive_buffer.extend_from_slice(&self.read_buffer[..n]);
        match self.parser.parse(&self.receive_buffer, &mut self.request) {
            ParseStatus::NeedData => ConnectionState::ReadingRequest,
            ParseStatus::Complete => ConnectionState::Dispatching(Dispatch::Request),
            ParseStatus::Malformed(e) => {
                tracing::debug!(connection_id = %self.id, request_id = %self.request_id, error = %e, "Malformed request");
                ConnectionState::Dispatching(Dispatch::Stock(StatusCode::BAD_REQUEST))
            }
        }
    }

    fn dispatch(&mut self, dispatch: Dispatch) -> ConnectionState {
        self.request_timer.disarm();

        let response = match dispatch {
            Dispatch::Request => self.creator.create_dynamic_response(&self.request),
            Dispatch::Stock(status) => self.creator.create_stock_response(&self.request, status),
        };
        let persistent = is_persistent(&self.request);

        tracing::info!(
            connection_id = %self.id,
            request_id = %self.request_id,
            method = ?self.request.method(),
            uri = %self.request.uri(),
            status = response.status().as_u16(),
            persistent,
            "Request handled"
        );
        metrics::record_request(response.status().as_u16());

        ConnectionState::WritingResponse {
            output: response.to_bytes(),
            persistent,
        }
    }

    async fn write_response(&mut self, output: &[u8], persistent: bool) -> ConnectionState {
        let mut written = 0;
        while written < output.len() {
            match self.stream.write(&output[written..]).await {
                Ok(0) => {
                    tracing::warn!(connection_id = %self.id, "Peer stopped accepting response bytes");
                    return ConnectionState::Closed;
                }
                Ok(n) => written += n,
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    tracing::warn!(connection_id = %self.id, error = %e, "Write failed");
                    return ConnectionState::Closed;
                }
            }
        }

        if !persistent {
            return ConnectionState::Closed;
        }

        self.receive_buffer.clear();
        self.parser.reset();
        self.request = self.creator.create_new_request();
        self.request_id = Uuid::new_v4();
        self.idle_timer.arm(self.settings.idle_timeout);
        ConnectionState::IdleWaiting
    }

    #[cfg(test)]
    fn timers_armed(&self) -> (bool, bool) {
        (self.request_timer.is_armed(), self.idle_timer.is_armed())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("buffered", &self.receive_buffer.len())
            .finish_non_exhaustive()
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

/// Duplicated handles of live sockets, keyed by connection.
type SocketRegistry = Arc<Mutex<HashMap<ConnectionId, std::net::TcpStream>>>;

/// Tracks live connections of a listener.
///
/// Besides counting, the tracker keeps a duplicate of every registered
/// socket so [`close_all`](Self::close_all) can shut connections down
/// without waiting for their tasks to be polled.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    sockets: SocketRegistry,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            sockets: Arc::clone(&self.sockets),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Shut down both directions of every registered socket.
    ///
    /// Peers see the close immediately; the owning tasks observe it as EOF
    /// or a write error the next time they run. Returns how many sockets
    /// were shut down.
    pub fn close_all(&self) -> usize {
        let sockets: Vec<_> = self
            .sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (id, socket) in &sockets {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                tracing::debug!(connection_id = %id, error = %e, "Socket already closed");
            }
        }
        sockets.len()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    sockets: SocketRegistry,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Register `stream` for [`ConnectionTracker::close_all`] and hand it back.
    ///
    /// Must be called inside a tokio runtime.
    pub fn register(&self, stream: TcpStream) -> std::io::Result<TcpStream> {
        let stream = stream.into_std()?;
        let duplicate = stream.try_clone()?;
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.id, duplicate);
        TcpStream::from_std(stream)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.sockets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}
