//! Local SOCKS5 proxy server
//!
//! Accepts connections on the bridge port and runs each one through a
//! [`ConnectionHandler`] on a bounded pool of session tasks.
//!
//! Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`. An
//! accept loop that dies of a genuine I/O fault moves the server to
//! `Crashed`; [`ProxyServer::stop`] then reports the fault and resets it to
//! `Stopped`.

mod handler;
mod relay;

pub use handler::ConnectionHandler;
pub use relay::{relay, RelayStats};

use crate::bridge::Socks5Bridge;
use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};
use crate::session::Session;
use crate::transport::SocketOpts;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`ProxyServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not listening
    Stopped,
    /// Binding the listener
    Starting,
    /// Accepting connections
    Running,
    /// `stop()` requested; accept loop and sessions are being torn down
    Stopping,
    /// The accept loop failed; the server no longer accepts connections
    Crashed,
}

/// Source of incoming client connections for the accept loop
#[async_trait]
trait Acceptor: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Local SOCKS5 server bridging every session through a [`Socks5Bridge`]
pub struct ProxyServer {
    config: ServerConfig,
    handler: Arc<ConnectionHandler>,
    state: Arc<watch::Sender<ServerState>>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<Result<()>>>,
}

impl ProxyServer {
    /// Create a stopped server
    pub fn new(config: ServerConfig, bridge: Arc<dyn Socks5Bridge>) -> Self {
        let handler = Arc::new(ConnectionHandler::new(bridge, &config));
        let (state, _) = watch::channel(ServerState::Stopped);

        ProxyServer {
            config,
            handler,
            state: Arc::new(state),
            local_addr: None,
            accept_task: None,
        }
    }

    /// Bind the listener and start accepting connections
    ///
    /// Returns the bound address. Fails with [`BridgeError::IllegalState`]
    /// unless the server is stopped.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let started = self.state.send_if_modified(|state| {
            if *state == ServerState::Stopped {
                *state = ServerState::Starting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BridgeError::IllegalState(format!(
                "cannot start server in state {:?}",
                self.state()
            )));
        }

        let listener = match bind_listener(self.config.listen_addr()) {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(e.into());
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(e.into());
            }
        };

        self.run(listener, local_addr);

        info!(
            "SOCKS5 bridge listening on {} ({} workers)",
            local_addr, self.config.max_workers
        );
        Ok(local_addr)
    }

    /// Move to `Running` and spawn the accept loop over `acceptor`
    fn run<A: Acceptor>(&mut self, acceptor: A, local_addr: SocketAddr) {
        self.state.send_replace(ServerState::Running);
        self.local_addr = Some(local_addr);
        self.accept_task = Some(tokio::spawn(accept_loop(
            acceptor,
            self.handler.clone(),
            self.state.clone(),
            Arc::new(Semaphore::new(self.config.max_workers)),
        )));
    }

    /// Stop accepting, close the listener and abort every in-flight session
    ///
    /// Returns the accept loop's outcome, i.e. [`BridgeError::ServerCrashed`]
    /// if it had died before the call. Stopping a stopped server is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(accept_task) = self.accept_task.take() else {
            return Ok(());
        };

        self.state.send_if_modified(|state| {
            if *state == ServerState::Running {
                *state = ServerState::Stopping;
                true
            } else {
                false
            }
        });

        let result = match accept_task.await {
            Ok(result) => result,
            Err(e) => Err(BridgeError::ServerCrashed(io::Error::new(
                io::ErrorKind::Other,
                format!("accept loop aborted: {}", e),
            ))),
        };

        self.local_addr = None;
        self.state.send_replace(ServerState::Stopped);
        info!("SOCKS5 bridge stopped");
        result
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions, e.g. to notice a crash
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Whether the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Whether a stop is in progress
    pub fn is_stopping(&self) -> bool {
        self.state() == ServerState::Stopping
    }

    /// Address the listener is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
    }
}

/// Create the listening socket with address reuse enabled
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop<A: Acceptor>(
    listener: A,
    handler: Arc<ConnectionHandler>,
    state: Arc<watch::Sender<ServerState>>,
    permits: Arc<Semaphore>,
) -> Result<()> {
    let mut state_rx = state.subscribe();
    let mut sessions = JoinSet::new();
    let mut next_session: u64 = 0;

    let result = loop {
        tokio::select! {
            _ = stop_requested(&mut state_rx) => {
                debug!("Stop requested, leaving accept loop");
                break Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_session += 1;
                    let id = format!("session-{}", next_session);
                    debug!(session = %id, "Accepted connection from {}", peer);

                    if let Err(e) = SocketOpts::for_local_client().apply(&stream) {
                        debug!(session = %id, "Failed to set socket options: {}", e);
                    }

                    let handler = handler.clone();
                    let permits = permits.clone();
                    sessions.spawn(async move {
                        // Queue here until a worker slot frees up
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return;
                        };
                        let _ = handler.handle(Session::new(id, stream, Some(peer))).await;
                    });
                }
                Err(e) if *state.borrow() == ServerState::Stopping => {
                    debug!("Accept failed while stopping: {}", e);
                    break Ok(());
                }
                Err(e) => {
                    error!("Accept loop failed: {}", e);
                    break Err(e);
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("Session task panicked: {}", e);
                    }
                }
            }
        }
    };

    drop(listener);
    if !sessions.is_empty() {
        debug!("Aborting {} in-flight sessions", sessions.len());
    }
    sessions.shutdown().await;

    result.map_err(|e| {
        state.send_replace(ServerState::Crashed);
        BridgeError::ServerCrashed(e)
    })
}

async fn stop_requested(state_rx: &mut watch::Receiver<ServerState>) {
    let _ = state_rx.wait_for(|s| *s == ServerState::Stopping).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Upstream;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct DirectBridge;

    #[async_trait]
    impl Socks5Bridge for DirectBridge {
        async fn connect(&self, _session_id: &str, address: IpAddr, port: u16) -> Result<Upstream> {
            Ok(Upstream::from_tcp(TcpStream::connect((address, port)).await?)?)
        }
    }

    fn server() -> ProxyServer {
        ProxyServer::new(ServerConfig::with_port(0), Arc::new(DirectBridge))
    }

    #[tokio::test]
    async fn test_server_lifecycle() {
        let mut server = server();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        let addr = server.start().await.unwrap();
        assert!(server.is_running());
        assert!(!server.is_stopping());
        assert_eq!(server.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_server_start_twice_is_illegal() {
        let mut server = server();
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::IllegalState(_)));
        assert!(server.is_running());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_stop_is_idempotent() {
        let mut server = server();
        server.stop().await.unwrap();

        server.start().await.unwrap();
        server.stop().await.unwrap();
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_server_restart_same_instance() {
        let mut server = server();
        server.start().await.unwrap();
        server.stop().await.unwrap();
        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_bind_failure_returns_to_stopped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut server = ProxyServer::new(ServerConfig::with_port(port), Arc::new(DirectBridge));
        assert!(server.start().await.is_err());
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_server_stop_closes_listener() {
        let mut server = server();
        let addr = server.start().await.unwrap();
        server.stop().await.unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    /// Acceptor whose listener has failed for good
    struct BrokenAcceptor;

    #[async_trait]
    impl Acceptor for BrokenAcceptor {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            Err(io::Error::new(io::ErrorKind::Other, "listener broke"))
        }
    }

    #[tokio::test]
    async fn test_server_accept_failure_crashes_and_restarts() {
        let mut server = server();
        let mut state_rx = server.subscribe();

        server.run(BrokenAcceptor, "127.0.0.1:1081".parse().unwrap());
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            state_rx.wait_for(|state| *state == ServerState::Crashed),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!server.is_running());
        assert!(!server.is_stopping());

        let err = server.stop().await.unwrap_err();
        assert!(matches!(err, BridgeError::ServerCrashed(_)));
        assert!(err.to_string().contains("listener broke"));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());

        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_handles_greeting() {
        let mut server = server();
        let addr = server.start().await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut selection = [0u8; 2];
        client.read_exact(&mut selection).await.unwrap();
        assert_eq!(selection, [0x05, 0x00]);

        server.stop().await.unwrap();
    }
}
