//! Per-connection SOCKS5 state machine
//!
//! Drives one [`Session`] through greeting, optional authentication and the
//! command request, asks the [`Socks5Bridge`] for an upstream connection and
//! relays until either side closes. Failures end the session only.

use super::relay::{relay, RelayStats};
use crate::bridge::Socks5Bridge;
use crate::config::ServerConfig;
use crate::error::{BridgeError, ReplyCode, Result};
use crate::session::{Session, SessionState};
use crate::socks::codec::{
    read_command_frame, read_greeting, read_username_password_auth, resolve_request,
    write_auth_result, write_command_reply, write_method_selection, HostResolver,
    SystemResolver,
};
use crate::socks::{
    AuthMethod, CommandRequest, SocksCommand, SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
    SOCKS5_AUTH_METHOD_PASSWORD,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Bind address sent with failure replies
const UNSPECIFIED_BIND: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Handles accepted connections on behalf of the proxy server
pub struct ConnectionHandler {
    bridge: Arc<dyn Socks5Bridge>,
    resolver: Arc<dyn HostResolver>,
    require_auth: bool,
    handshake_timeout: Duration,
    relay_buffer_size: usize,
}

impl ConnectionHandler {
    /// Create a handler using `bridge` for upstream connections
    pub fn new(bridge: Arc<dyn Socks5Bridge>, config: &ServerConfig) -> Self {
        ConnectionHandler {
            bridge,
            resolver: Arc::new(SystemResolver),
            require_auth: config.require_auth,
            handshake_timeout: config.handshake_timeout(),
            relay_buffer_size: config.relay_buffer_size,
        }
    }

    /// Resolve domain name targets with `resolver` instead of the system
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run a session to completion
    ///
    /// The client stream is always closed when this returns. The result is
    /// only informational; errors have already been answered on the wire where
    /// possible and logged.
    pub async fn handle<S>(&self, mut session: Session<S>) -> Result<RelayStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = self.drive(&mut session).await;

        match &result {
            Ok(stats) => info!(
                session = %session.id(),
                target = ?session.target(),
                "Session finished: {}",
                stats
            ),
            Err(e) => {
                session.set_error(e.to_string());
                warn!(
                    session = %session.id(),
                    state = %session.state(),
                    peer = ?session.peer(),
                    "Session failed after {:?}: {}",
                    session.elapsed(),
                    e
                );
            }
        }

        session.close().await;
        result
    }

    async fn drive<S>(&self, session: &mut Session<S>) -> Result<RelayStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // The deadline covers client reads only; DNS runs after the frame is in
        let mut request = tokio::time::timeout(self.handshake_timeout, self.negotiate(session))
            .await
            .map_err(|_| {
                BridgeError::Timeout(format!(
                    "no complete request within {:?}",
                    self.handshake_timeout
                ))
            })??;

        resolve_request(&mut request, self.resolver.as_ref()).await;
        let target = self.check_request(session, request).await?;

        session.set_state(SessionState::Bridging);
        let upstream = match self
            .bridge
            .connect(session.id(), target.ip(), target.port())
            .await
        {
            Ok(upstream) => upstream,
            Err(e) => {
                self.reply(session, e.reply_code(), UNSPECIFIED_BIND).await;
                return Err(e);
            }
        };

        let stream = client_stream(session)?;
        write_command_reply(stream, ReplyCode::Succeeded, upstream.local_addr).await?;

        session.set_state(SessionState::Relaying);
        debug!(session = %session.id(), "Relaying to {}", target);

        let client = session
            .take_stream()
            .ok_or_else(|| BridgeError::IllegalState("session stream already taken".into()))?;
        let stats = relay(client, upstream.stream, self.relay_buffer_size).await?;
        session.set_state(SessionState::Closed);
        Ok(stats)
    }

    /// Greeting, authentication and command phases
    async fn negotiate<S>(&self, session: &mut Session<S>) -> Result<CommandRequest>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        session.set_state(SessionState::AwaitGreeting);
        let methods = read_greeting(client_stream(session)?).await?;

        let method = match self.select_method(&methods) {
            Some(method) => method,
            None => {
                write_method_selection(client_stream(session)?, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE)
                    .await?;
                return Err(BridgeError::NoAcceptableAuthMethods);
            }
        };
        write_method_selection(client_stream(session)?, method.to_byte()).await?;
        session.set_auth_method(method);

        if method == AuthMethod::UsernamePassword {
            session.set_state(SessionState::AwaitAuth);
            let stream = client_stream(session)?;
            let (username, _password) = read_username_password_auth(stream).await?;
            // Credentials are checked on the remote hop, not here
            write_auth_result(stream, true).await?;
            debug!(session = %session.id(), "Accepted local user {:?}", username);
        }

        session.set_state(SessionState::AwaitCommand);
        match read_command_frame(client_stream(session)?).await {
            Ok(request) => Ok(request),
            Err(e) => {
                if matches!(e, BridgeError::Protocol(_)) {
                    self.reply(session, ReplyCode::GeneralFailure, UNSPECIFIED_BIND)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Answer deferred failures and unsupported commands, else return the target
    async fn check_request<S>(
        &self,
        session: &mut Session<S>,
        request: CommandRequest,
    ) -> Result<SocketAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if let Some(code) = request.deferred_reply {
            self.reply(session, code, UNSPECIFIED_BIND).await;
            return Err(match code {
                ReplyCode::HostUnreachable => {
                    BridgeError::HostUnreachable(request.host.unwrap_or_default())
                }
                ReplyCode::AddressTypeNotSupported => {
                    BridgeError::UnsupportedAddressType(request.address_type)
                }
                other => BridgeError::SocksServerReply(other),
            });
        }

        if request.command() != Some(SocksCommand::Connect) {
            self.reply(session, ReplyCode::CommandNotSupported, UNSPECIFIED_BIND)
                .await;
            return Err(BridgeError::Protocol(format!(
                "Command not supported: {:#04x}",
                request.command
            )));
        }

        let target = request.socket_addr().ok_or_else(|| {
            BridgeError::Protocol(format!("No destination address in request {}", request))
        })?;
        session.set_target(target);
        debug!(session = %session.id(), "CONNECT {}", request);

        Ok(target)
    }

    /// Choose the authentication method for the local client
    fn select_method(&self, offered: &[u8]) -> Option<AuthMethod> {
        let offers = |method: u8| offered.contains(&method);

        if self.require_auth {
            return offers(SOCKS5_AUTH_METHOD_PASSWORD).then_some(AuthMethod::UsernamePassword);
        }
        if offers(SOCKS5_AUTH_METHOD_NONE) {
            Some(AuthMethod::NoAuth)
        } else if offers(SOCKS5_AUTH_METHOD_PASSWORD) {
            Some(AuthMethod::UsernamePassword)
        } else {
            None
        }
    }

    /// Best-effort failure reply
    async fn reply<S>(&self, session: &mut Session<S>, code: ReplyCode, bind_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let id = session.id().to_string();
        if let Some(stream) = session.stream_mut() {
            if let Err(e) = write_command_reply(stream, code, bind_addr).await {
                debug!(session = %id, "Failed to send reply {:?}: {}", code, e);
            }
        }
    }
}

fn client_stream<S>(session: &mut Session<S>) -> Result<&mut S> {
    session
        .stream_mut()
        .ok_or_else(|| BridgeError::IllegalState("session stream already closed".into()))
}
