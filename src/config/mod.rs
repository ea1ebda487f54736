//! Configuration module for Socksbridge
//!
//! This module provides configuration types and parsing for the bridge.

mod proxy;
mod server;
mod transport;

pub use proxy::ProxyConfig;
pub use server::ServerConfig;
pub use transport::{KeyStoreInfo, TcpConfig, TlsConfig};

use crate::error::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Local bridge server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote proxy configuration
    pub proxy: ProxyConfig,
}

impl Config {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.proxy.validate()
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
