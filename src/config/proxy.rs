//! Remote proxy configuration

use super::{TcpConfig, TlsConfig};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    10
}

/// The authenticated remote SOCKS5 proxy the bridge tunnels through
#[derive(Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Remote proxy host name or IP address
    pub host: String,

    /// Remote proxy port
    pub port: u16,

    /// Username for the remote proxy
    #[serde(default)]
    pub username: Option<String>,

    /// Password for the remote proxy
    #[serde(default)]
    pub password: Option<String>,

    /// Timeout for connecting and negotiating, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// TCP options for the proxy connection
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Wrap the proxy connection in TLS
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("tcp", &self.tcp)
            .field("tls", &self.tls)
            .finish()
    }
}

impl ProxyConfig {
    /// Create a plain TCP proxy configuration without credentials
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
            tcp: TcpConfig::default(),
            tls: None,
        }
    }

    /// Set the credentials used against the remote proxy
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Username and password, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// `host:port` of the remote proxy
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BridgeError::Config("proxy host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(BridgeError::Config("proxy port must not be 0".into()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(BridgeError::Config(
                "proxy username and password must be configured together".into(),
            ));
        }
        if let Some((username, password)) = self.credentials() {
            if username.len() > 255 || password.len() > 255 {
                return Err(BridgeError::Config(
                    "proxy credentials must not exceed 255 bytes".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_config_credentials() {
        let config = ProxyConfig::new("proxy", 1080);
        assert!(config.credentials().is_none());

        let config = config.with_credentials("user", "pass");
        assert_eq!(config.credentials(), Some(("user", "pass")));
        assert_eq!(config.addr(), "proxy:1080");
    }

    #[test]
    fn test_proxy_config_validate() {
        assert!(ProxyConfig::new("proxy", 1080).validate().is_ok());
        assert!(ProxyConfig::new("", 1080).validate().is_err());
        assert!(ProxyConfig::new("proxy", 0).validate().is_err());

        let mut config = ProxyConfig::new("proxy", 1080);
        config.username = Some("user".into());
        assert!(config.validate().is_err());

        let config = ProxyConfig::new("proxy", 1080).with_credentials("x".repeat(256), "pass");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proxy_config_debug_hides_password() {
        let config = ProxyConfig::new("proxy", 1080).with_credentials("user", "hunter2");
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("user"));
        assert!(!debug_str.contains("hunter2"));
    }
}
