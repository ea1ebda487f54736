//! Per-connection session state

use crate::socks::AuthMethod;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Progress of a session through the SOCKS5 exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client's method list
    AwaitGreeting,
    /// Waiting for username/password sub-negotiation
    AwaitAuth,
    /// Waiting for the command request
    AwaitCommand,
    /// Opening the upstream connection
    Bridging,
    /// Copying bytes in both directions
    Relaying,
    /// Finished; the client stream is closed
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitGreeting => "await-greeting",
            SessionState::AwaitAuth => "await-auth",
            SessionState::AwaitCommand => "await-command",
            SessionState::Bridging => "bridging",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One accepted client connection and what has been negotiated on it
///
/// The session exclusively owns the client stream until it is either handed
/// to the relay with [`Session::take_stream`] or closed.
pub struct Session<S> {
    id: String,
    peer: Option<SocketAddr>,
    stream: Option<S>,
    state: SessionState,
    auth_method: Option<AuthMethod>,
    target: Option<SocketAddr>,
    error: Option<String>,
    created: Instant,
}

impl<S> Session<S> {
    /// Create a session for a freshly accepted stream
    pub fn new(id: impl Into<String>, stream: S, peer: Option<SocketAddr>) -> Self {
        Session {
            id: id.into(),
            peer,
            stream: Some(stream),
            state: SessionState::AwaitGreeting,
            auth_method: None,
            target: None,
            error: None,
            created: Instant::now(),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address of the local client
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Negotiated authentication method
    pub fn auth_method(&self) -> Option<AuthMethod> {
        self.auth_method
    }

    pub(crate) fn set_auth_method(&mut self, method: AuthMethod) {
        self.auth_method = Some(method);
    }

    /// Destination requested by the client, once parsed and resolved
    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    pub(crate) fn set_target(&mut self, target: SocketAddr) {
        self.target = Some(target);
    }

    /// Error that ended the session, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Time since the session was accepted
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// Mutable access to the client stream while it is still owned here
    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    /// Move the client stream out, e.g. into the relay
    pub fn take_stream(&mut self) -> Option<S> {
        self.stream.take()
    }

    /// Whether the client stream has been closed or handed off
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl<S: AsyncWrite + Unpin> Session<S> {
    /// Shut down and drop the client stream
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = SessionState::Closed;
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("auth_method", &self.auth_method)
            .field("target", &self.target)
            .field("error", &self.error)
            .finish()
    }
}
