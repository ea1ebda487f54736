//! Outbound SOCKS5 client
//!
//! Connects to the remote proxy, optionally over TLS, negotiates an
//! authentication method, authenticates with the configured credentials and
//! issues CONNECT for the real destination.

use crate::bridge::Upstream;
use crate::config::ProxyConfig;
use crate::error::{BridgeError, ReplyCode, Result};
use crate::socks::codec::{
    read_auth_result, read_command_reply, read_method_selection, write_command_request,
    write_greeting, write_username_password_auth,
};
use crate::socks::{
    SocksCommand, TargetAddr, SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE,
    SOCKS5_AUTH_METHOD_PASSWORD,
};
use crate::transport::{SocketOpts, TlsTransport};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// SOCKS5 client for one remote proxy
#[derive(Clone)]
pub struct Socks5Client {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    connect_timeout: Duration,
    socket_opts: SocketOpts,
    tls: Option<TlsTransport>,
}

impl std::fmt::Debug for Socks5Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.credentials.as_ref().map(|(username, _)| username))
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Socks5Client {
    /// Create a client from the proxy configuration
    ///
    /// The TLS connector, if any, is built here once.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let tls = match &config.tls {
            Some(tls_config) => Some(TlsTransport::with_config(tls_config, &config.host)?),
            None => None,
        };

        Ok(Socks5Client {
            host: config.host.clone(),
            port: config.port,
            credentials: config
                .credentials()
                .map(|(username, password)| (username.to_string(), password.to_string())),
            connect_timeout: config.connect_timeout(),
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            tls,
        })
    }

    /// Open a tunnel to `target` through the remote proxy
    ///
    /// Connection setup and the whole negotiation share one timeout. On any
    /// failure the partially open connection is dropped.
    pub async fn connect(&self, target: &TargetAddr) -> Result<Upstream> {
        tokio::time::timeout(self.connect_timeout, self.connect_inner(target))
            .await
            .map_err(|_| {
                BridgeError::Timeout(format!(
                    "connecting to {} through {}:{}",
                    target, self.host, self.port
                ))
            })?
    }

    async fn connect_inner(&self, target: &TargetAddr) -> Result<Upstream> {
        let tcp_stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.socket_opts.apply(&tcp_stream)?;
        let local_addr = tcp_stream.local_addr()?;

        debug!(
            "Connected to proxy {}:{} from {}",
            self.host, self.port, local_addr
        );

        let credentials = self
            .credentials
            .as_ref()
            .map(|(username, password)| (username.as_str(), password.as_str()));

        match &self.tls {
            Some(tls) => {
                let mut stream = tls.connect(tcp_stream).await?;
                handshake(&mut stream, credentials, target).await?;
                Ok(Upstream::new(stream, local_addr))
            }
            None => {
                let mut stream = tcp_stream;
                handshake(&mut stream, credentials, target).await?;
                Ok(Upstream::new(stream, local_addr))
            }
        }
    }
}

/// Run the client side of a SOCKS5 negotiation over an open stream
///
/// Returns the address the remote proxy reports as bound. Every step runs in
/// order; a failed step ends the negotiation.
pub async fn handshake<S>(
    stream: &mut S,
    credentials: Option<(&str, &str)>,
    target: &TargetAddr,
) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let methods: &[u8] = if credentials.is_some() {
        &[SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD]
    } else {
        &[SOCKS5_AUTH_METHOD_NONE]
    };
    write_greeting(stream, methods).await?;

    let method = read_method_selection(stream).await?;
    if method == SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE {
        return Err(BridgeError::NoAcceptableAuthMethods);
    }
    if !methods.contains(&method) {
        return Err(BridgeError::Protocol(format!(
            "Server selected method {:#04x} which was not offered",
            method
        )));
    }

    if let (SOCKS5_AUTH_METHOD_PASSWORD, Some((username, password))) = (method, credentials) {
        write_username_password_auth(stream, username, password).await?;
        if !read_auth_result(stream).await? {
            return Err(BridgeError::AuthenticationFailed);
        }
    }

    write_command_request(stream, SocksCommand::Connect, target).await?;

    let (reply, bound) = read_command_reply(stream).await?;
    if reply != ReplyCode::Succeeded {
        return Err(BridgeError::SocksServerReply(reply));
    }

    debug!("Remote proxy bound {} for {}", bound, target);
    Ok(bound)
}
