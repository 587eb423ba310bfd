//! TCP listener for the control channel.
//!
//! # Responsibilities
//! - Validate timeouts before any socket is opened
//! - Bind to the configured address and accept incoming TCP connections
//! - Hand every accepted socket to its own [`Connection`]
//! - Own the live connections and tear them all down on stop
//! - Graceful handling of accept errors
//!
//! # Design Decisions
//! - The accept task only holds a `Weak` reference to the socket; the
//!   `Listener` holds the single strong one, so `stop()` closes the port
//!   before it returns
//! - Live sockets are shut down through the [`ConnectionTracker`] registry
//!   rather than by waiting for aborted tasks to be dropped

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::task::Poll;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::http::ResponseCreatorFactory;
use crate::net::connection::{Connection, ConnectionSettings, ConnectionTracker};

/// Pending connection queue length passed to `listen(2)`.
const BACKLOG: u32 = 1024;

/// Pause after a failed accept so descriptor exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Default limit on request body size.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Constructor arguments are unusable.
    #[error("invalid listener configuration: {0}")]
    Configuration(String),

    /// `start` was called on a running listener.
    #[error("listener for {0} is already running")]
    AlreadyRunning(SocketAddr),

    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The operation needs a started listener.
    #[error("listener is not running")]
    NotRunning,
}

/// Time allowed to receive one complete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout(pub Duration);

impl RequestTimeout {
    /// Timeout of `ms` milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }
}

/// Time a persistent connection may stay idle between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeout(pub Duration);

impl IdleTimeout {
    /// Timeout of `ms` milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }
}

/// Socket and accept task of a started listener.
struct Running {
    socket: Arc<TcpListener>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// Control channel listener.
///
/// Connections run as tasks on `runtime`; the listener exclusively owns
/// them, so stopping or dropping it closes every live connection.
pub struct Listener {
    runtime: Handle,
    endpoint: SocketAddr,
    factory: Arc<dyn ResponseCreatorFactory>,
    settings: watch::Sender<ConnectionSettings>,
    tracker: ConnectionTracker,
    running: Option<Running>,
}

impl Listener {
    /// Create a stopped listener for `address:port`.
    pub fn new(
        runtime: Handle,
        address: IpAddr,
        port: u16,
        factory: Arc<dyn ResponseCreatorFactory>,
        request_timeout: RequestTimeout,
        idle_timeout: IdleTimeout,
    ) -> Result<Self, ListenerError> {
        check_timeouts(request_timeout, idle_timeout)?;
        let (settings, _) = watch::channel(ConnectionSettings {
            request_timeout: request_timeout.0,
            idle_timeout: idle_timeout.0,
            max_body_size: DEFAULT_MAX_REQUEST_SIZE,
        });

        Ok(Self {
            runtime,
            endpoint: SocketAddr::new(address, port),
            factory,
            settings,
            tracker: ConnectionTracker::new(),
            running: None,
        })
    }

    /// Limit request bodies to `size` bytes; larger requests get a 400.
    pub fn with_max_request_size(self, size: usize) -> Self {
        self.settings
            .send_modify(|settings| settings.max_body_size = size);
        self
    }

    /// Replace timeouts and size limit without rebinding.
    ///
    /// Applies to connections accepted afterwards; live connections keep
    /// the settings they were accepted with.
    pub fn reconfigure(
        &self,
        request_timeout: RequestTimeout,
        idle_timeout: IdleTimeout,
        max_request_size: usize,
    ) -> Result<(), ListenerError> {
        check_timeouts(request_timeout, idle_timeout)?;
        self.settings.send_replace(ConnectionSettings {
            request_timeout: request_timeout.0,
            idle_timeout: idle_timeout.0,
            max_body_size: max_request_size,
        });
        tracing::info!(endpoint = %self.endpoint, "Listener reconfigured");
        Ok(())
    }

    /// Settings handed to newly accepted connections.
    pub fn settings(&self) -> ConnectionSettings {
        *self.settings.borrow()
    }

    /// Bind and begin accepting connections.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.running.is_some() {
            return Err(ListenerError::AlreadyRunning(self.endpoint));
        }

        let _runtime = self.runtime.enter();
        let bind_error = |source| ListenerError::Bind {
            addr: self.endpoint,
            source,
        };
        let socket = Arc::new(bind(self.endpoint).map_err(bind_error)?);
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let settings = self.settings();
        tracing::info!(
            address = %local_addr,
            request_timeout_ms = settings.request_timeout.as_millis() as u64,
            idle_timeout_ms = settings.idle_timeout.as_millis() as u64,
            "Listener bound"
        );

        let accept_task = self.runtime.spawn(accept_loop(
            Arc::downgrade(&socket),
            Arc::clone(&self.factory),
            self.settings.subscribe(),
            self.tracker.clone(),
        ));
        self.running = Some(Running {
            socket,
            local_addr,
            accept_task,
        });
        Ok(())
    }

    /// Stop accepting and close every live connection. Idempotent.
    ///
    /// The listening socket is closed and live sockets are shut down before
    /// this returns, so the same port can be bound again right away. Call
    /// it from the loop thread.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.accept_task.abort();
        let closed = self.tracker.close_all();
        drop(running.socket);

        tracing::info!(
            address = %running.local_addr,
            connections = closed,
            "Listener stopped"
        );
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        self.running
            .as_ref()
            .map(|running| running.local_addr)
            .ok_or(ListenerError::NotRunning)
    }

    /// Port the listener is actually bound to.
    pub fn local_port(&self) -> Result<u16, ListenerError> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Configured address and port.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Get current live connection count.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr().ok())
            .field("settings", &self.settings())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn check_timeouts(request_timeout: RequestTimeout, idle_timeout: IdleTimeout) -> Result<(), ListenerError> {
    if request_timeout.0.is_zero() {
        return Err(ListenerError::Configuration(
            "request timeout must be greater than 0".into(),
        ));
    }
    if idle_timeout.0.is_zero() {
        return Err(ListenerError::Configuration(
            "idle timeout must be greater than 0".into(),
        ));
    }
    Ok(())
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}

/// Accept on `socket` without keeping it alive between polls.
///
/// Resolves to `None` once the owning [`Listener`] has dropped the socket.
fn accept(socket: &Weak<TcpListener>) -> impl Future<Output = Option<io::Result<(TcpStream, SocketAddr)>>> + '_ {
    std::future::poll_fn(move |cx| match socket.upgrade() {
        Some(socket) => socket.poll_accept(cx).map(Some),
        None => Poll::Ready(None),
    })
}

/// Accept connections until aborted or the socket is gone. Dropping
/// `connections` aborts every connection task.
async fn accept_loop(
    socket: Weak<TcpListener>,
    factory: Arc<dyn ResponseCreatorFactory>,
    settings: watch::Receiver<ConnectionSettings>,
    tracker: ConnectionTracker,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = accept(&socket) => match accepted {
                Some(Ok((stream, peer))) => {
                    let guard = tracker.track();
                    let stream = match guard.register(stream) {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!(peer_addr = %peer, error = %e, "Failed to register connection");
                            continue;
                        }
                    };
                    let settings = *settings.borrow();
                    let connection = Connection::new(stream, peer, factory.create(), settings, guard);
                    connections.spawn(connection.run());
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                None => break,
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, HttpResponse, ResponseCreator};
    use http::{StatusCode, Version};
    use std::net::Ipv4Addr;

    struct Empty;

    impl ResponseCreator for Empty {
        fn create_new_request(&self) -> HttpRequest {
            HttpRequest::post_json()
        }

        fn create_stock_response(&self, _: &HttpRequest, status: StatusCode) -> HttpResponse {
            HttpResponse::stock(Version::HTTP_11, status)
        }

        fn create_dynamic_response(&mut self, _: &HttpRequest) -> HttpResponse {
            HttpResponse::new(Version::HTTP_11, StatusCode::OK)
        }
    }

    impl ResponseCreatorFactory for Empty {
        fn create(&self) -> Box<dyn ResponseCreator> {
            Box::new(Empty)
        }
    }

    fn listener(request_ms: u64, idle_ms: u64) -> Result<Listener, ListenerError> {
        Listener::new(
            Handle::current(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            Arc::new(Empty),
            RequestTimeout::from_millis(request_ms),
            IdleTimeout::from_millis(idle_ms),
        )
    }

    #[tokio::test]
    async fn settings_follow_builder_and_reconfigure() {
        let listener = listener(1000, 2000).unwrap().with_max_request_size(64);
        let settings = listener.settings();
        assert_eq!(settings.request_timeout, Duration::from_millis(1000));
        assert_eq!(settings.idle_timeout, Duration::from_millis(2000));
        assert_eq!(settings.max_body_size, 64);

        listener
            .reconfigure(RequestTimeout::from_millis(5), IdleTimeout::from_millis(6), 7)
            .unwrap();
        assert_eq!(listener.settings().max_body_size, 7);

        assert!(matches!(
            listener.reconfigure(RequestTimeout::from_millis(0), IdleTimeout::from_millis(6), 7),
            Err(ListenerError::Configuration(_))
        ));
        assert_eq!(listener.settings().request_timeout, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn endpoint_is_configured_address() {
        let mut listener = listener(1000, 1000).unwrap();
        assert_eq!(listener.endpoint().port(), 0);
        assert!(!listener.is_running());

        listener.start().unwrap();
        assert!(listener.is_running());
        assert_eq!(listener.endpoint().port(), 0);
        assert_eq!(listener.active_connections(), 0);
    }

    #[tokio::test]
    async fn stop_closes_socket_without_yielding() {
        let mut listener = listener(1000, 1000).unwrap();
        listener.start().unwrap();
        let addr = listener.local_addr().unwrap();

        // No await between stop and the connect, so the aborted accept task
        // has not been polled again.
        listener.stop();
        assert!(std::net::TcpStream::connect(addr).is_err());
    }
}
