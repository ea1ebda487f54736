//! Transport configuration types
//!
//! TCP socket options and TLS settings for the hop to the remote proxy.

use serde::{Deserialize, Serialize};

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

fn default_nodelay() -> bool {
    true
}

/// TCP transport configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: default_nodelay(),
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// Location of PEM encoded key material
///
/// A trust store only needs `path` (a bundle of CA certificates). A key store
/// holds the client certificate chain at `path` and its private key at
/// `key_path`; when `key_path` is absent the key is read from `path` too.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KeyStoreInfo {
    /// PEM file with certificates
    pub path: String,

    /// PEM file with the private key
    #[serde(default)]
    pub key_path: Option<String>,
}

impl KeyStoreInfo {
    /// Key store at a single PEM path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key_path: None,
        }
    }

    /// Path holding the private key
    pub fn private_key_path(&self) -> &str {
        self.key_path.as_deref().unwrap_or(&self.path)
    }
}

/// TLS configuration for the proxy connection
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TlsConfig {
    /// Trusted roots; system roots are used when absent
    #[serde(default)]
    pub trust_store: Option<KeyStoreInfo>,

    /// Client certificate and key for mutual TLS
    #[serde(default)]
    pub key_store: Option<KeyStoreInfo>,

    /// Name to verify the proxy certificate against (defaults to the proxy host)
    #[serde(default)]
    pub server_name: Option<String>,

    /// Accept any certificate. Testing only.
    #[serde(default)]
    pub skip_verify: bool,
}
