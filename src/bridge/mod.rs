//! Bridging capability
//!
//! [`Socks5Bridge`] is the single seam the connection handler calls to obtain
//! an upstream connection for a session. [`AuthenticatingBridge`] is the
//! implementation that tunnels through an authenticated remote SOCKS5 proxy.

use crate::client::Socks5Client;
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::socks::TargetAddr;
use crate::transport::StreamDyn;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tracing::debug;

/// An established connection towards the destination
#[derive(Debug)]
pub struct Upstream {
    /// Connected stream; bytes written here reach the destination
    pub stream: Box<dyn StreamDyn>,
    /// Local address of the connection, reported to the client as bound address
    pub local_addr: SocketAddr,
}

impl Upstream {
    /// Wrap a connected stream
    pub fn new<S: StreamDyn + 'static>(stream: S, local_addr: SocketAddr) -> Self {
        Upstream {
            stream: Box::new(stream),
            local_addr,
        }
    }

    /// Wrap a direct TCP connection
    pub fn from_tcp(stream: TcpStream) -> std::io::Result<Self> {
        let local_addr = stream.local_addr()?;
        Ok(Upstream::new(stream, local_addr))
    }
}

/// Capability to open a tunnel to a destination for a session
#[async_trait]
pub trait Socks5Bridge: Send + Sync {
    /// Connect to `address:port` on behalf of `session_id`
    async fn connect(&self, session_id: &str, address: IpAddr, port: u16) -> Result<Upstream>;
}

/// Bridge through a fixed remote SOCKS5 proxy using its credentials
#[derive(Debug, Clone)]
pub struct AuthenticatingBridge {
    client: Socks5Client,
}

impl AuthenticatingBridge {
    /// Create a bridge for the configured remote proxy
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        Ok(AuthenticatingBridge {
            client: Socks5Client::new(config)?,
        })
    }
}

#[async_trait]
impl Socks5Bridge for AuthenticatingBridge {
    async fn connect(&self, session_id: &str, address: IpAddr, port: u16) -> Result<Upstream> {
        let target = TargetAddr::from(SocketAddr::new(address, port));
        debug!(session = %session_id, "Bridging to {}", target);
        self.client.connect(&target).await
    }
}
