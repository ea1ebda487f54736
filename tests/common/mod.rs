//! Test utilities and mocks for Socksbridge
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use socksbridge::config::ServerConfig;
use socksbridge::error::{BridgeError, ReplyCode, Result};
use socksbridge::server::relay;
use socksbridge::socks::codec::{
    read_command_request, read_greeting, read_username_password_auth, write_auth_result,
    write_command_reply, write_method_selection,
};
use socksbridge::socks::{SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE, SOCKS5_AUTH_METHOD_PASSWORD};
use socksbridge::{ProxyServer, Socks5Bridge, Upstream};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Start a TCP echo server, one task per connection
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Start a bridge server on an ephemeral port
pub async fn start_server(bridge: Arc<dyn Socks5Bridge>, max_workers: usize) -> (ProxyServer, SocketAddr) {
    let config = ServerConfig {
        max_workers,
        ..ServerConfig::with_port(0)
    };
    let mut server = ProxyServer::new(config, bridge);
    let addr = server.start().await.unwrap();
    (server, addr)
}

/// Connect to the bridge, negotiate NO AUTH and send `request`
///
/// Returns the stream and the 10-byte command reply.
pub async fn socks_request(addr: SocketAddr, request: &[u8]) -> (TcpStream, [u8; 10]) {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(&socks5_mock::create_auth_request_no_auth())
        .await
        .unwrap();
    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await.unwrap();
    assert_eq!(selection, [0x05, 0x00]);

    stream.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    (stream, reply)
}

/// Bridge that ignores the requested destination and connects to a fixed
/// local address instead, recording every call
pub struct StubBridge {
    redirect: SocketAddr,
    calls: Mutex<Vec<(String, SocketAddr)>>,
}

impl StubBridge {
    /// Redirect every session to `redirect`
    pub fn new(redirect: SocketAddr) -> Arc<Self> {
        Arc::new(StubBridge {
            redirect,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Calls seen so far
    pub fn calls(&self) -> Vec<(String, SocketAddr)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Socks5Bridge for StubBridge {
    async fn connect(&self, session_id: &str, address: IpAddr, port: u16) -> Result<Upstream> {
        self.calls
            .lock()
            .unwrap()
            .push((session_id.to_string(), SocketAddr::new(address, port)));
        let stream = TcpStream::connect(self.redirect).await?;
        Ok(Upstream::from_tcp(stream)?)
    }
}

/// Behaviour of a [`FakeRemoteProxy`]
#[derive(Clone, Default)]
pub struct FakeRemoteProxy {
    /// Credentials the proxy insists on; `None` accepts NO AUTH
    pub credentials: Option<(String, String)>,
    /// Answer every CONNECT with this reply instead of connecting
    pub reply: Option<ReplyCode>,
}

impl FakeRemoteProxy {
    /// Proxy that requires the given credentials
    pub fn with_credentials(username: &str, password: &str) -> Self {
        FakeRemoteProxy {
            credentials: Some((username.to_string(), password.to_string())),
            reply: None,
        }
    }

    /// Start serving on an ephemeral port
    pub async fn spawn(self) -> SocketAddr {
        let (listener, addr) = create_test_listener().await;
        let proxy = Arc::new(self);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    let _ = proxy.serve(stream).await;
                });
            }
        });

        addr
    }

    async fn serve(&self, mut stream: TcpStream) -> Result<()> {
        let methods = read_greeting(&mut stream).await?;

        let wanted = if self.credentials.is_some() {
            SOCKS5_AUTH_METHOD_PASSWORD
        } else {
            SOCKS5_AUTH_METHOD_NONE
        };
        if !methods.contains(&wanted) {
            write_method_selection(&mut stream, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE).await?;
            return Ok(());
        }
        write_method_selection(&mut stream, wanted).await?;

        if let Some((username, password)) = &self.credentials {
            let (user, pass) = read_username_password_auth(&mut stream).await?;
            let accepted = &user == username && &pass == password;
            write_auth_result(&mut stream, accepted).await?;
            if !accepted {
                return Err(BridgeError::AuthenticationFailed);
            }
        }

        let request = read_command_request(&mut stream).await?;
        let unspecified: SocketAddr = "0.0.0.0:0".parse().unwrap();

        if let Some(reply) = self.reply {
            write_command_reply(&mut stream, reply, unspecified).await?;
            return Ok(());
        }
        let Some(target) = request.socket_addr() else {
            write_command_reply(&mut stream, ReplyCode::HostUnreachable, unspecified).await?;
            return Ok(());
        };

        let upstream = match TcpStream::connect(target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                write_command_reply(&mut stream, ReplyCode::from(&e), unspecified).await?;
                return Ok(());
            }
        };
        write_command_reply(&mut stream, ReplyCode::Succeeded, upstream.local_addr()?).await?;
        relay(stream, upstream, 4096).await?;
        Ok(())
    }
}

/// Mock SOCKS5 handshake data
pub mod socks5_mock {
    use socksbridge::socks::*;

    /// Create a no-auth method selection request
    pub fn create_auth_request_no_auth() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
    }

    /// Create a password auth method selection request
    pub fn create_auth_request_password() -> Vec<u8> {
        vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD]
    }

    /// Create a connect command to IPv4 address
    pub fn create_connect_ipv4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV4,
        ];
        cmd.extend_from_slice(&ip);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Create a connect command to domain
    pub fn create_connect_domain(domain: &str, port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        cmd.extend_from_slice(domain.as_bytes());
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }

    /// Create a connect command to IPv6 address
    pub fn create_connect_ipv6(ip: [u8; 16], port: u16) -> Vec<u8> {
        let mut cmd = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_IPV6,
        ];
        cmd.extend_from_slice(&ip);
        cmd.extend_from_slice(&port.to_be_bytes());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_listener() {
        let (listener, addr) = create_test_listener().await;
        assert!(addr.port() > 0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_echo_server() {
        let addr = spawn_echo_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_socks5_mock_auth_request() {
        let request = socks5_mock::create_auth_request_no_auth();
        assert_eq!(request[0], 5); // SOCKS5 version
        assert_eq!(request[1], 1); // 1 method
        assert_eq!(request[2], 0); // NO AUTH
    }

    #[test]
    fn test_socks5_mock_connect_ipv4() {
        let cmd = socks5_mock::create_connect_ipv4([192, 168, 1, 1], 8080);
        assert_eq!(cmd[0], 5); // SOCKS5 version
        assert_eq!(cmd[1], 1); // CONNECT
        assert_eq!(cmd[3], 1); // IPv4
        assert_eq!(&cmd[4..8], &[192, 168, 1, 1]);
    }
}
