//! Local bridge server configuration

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    1081
}

fn default_max_workers() -> usize {
    100
}

/// Default client read timeout during the handshake, in seconds
fn default_handshake_timeout() -> u64 {
    10
}

fn default_relay_buffer_size() -> usize {
    64 * 1024
}

/// Configuration of the local anonymous SOCKS5 server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Interface the bridge listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Local bridge port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrently handled sessions
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Client read timeout while negotiating, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Relay buffer size per direction, in bytes
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,

    /// Ask local clients for username/password (always accepted)
    ///
    /// When false, NO AUTH is chosen if offered. A client that offers only
    /// USERNAME/PASSWORD is still served with that method rather than refused.
    #[serde(default)]
    pub require_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_workers: default_max_workers(),
            handshake_timeout: default_handshake_timeout(),
            relay_buffer_size: default_relay_buffer_size(),
            require_auth: false,
        }
    }
}

impl ServerConfig {
    /// Create a configuration listening on loopback at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Socket address to bind
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Handshake timeout as a duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(BridgeError::Config("max_workers must be at least 1".into()));
        }
        if self.relay_buffer_size == 0 {
            return Err(BridgeError::Config(
                "relay_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
