//! # Socksbridge - Anonymous-to-Authenticated SOCKS5 Bridge
//!
//! Socksbridge runs a local SOCKS5 server for clients that only speak
//! anonymous SOCKS5 (typically an SMTP library) and forwards every CONNECT
//! through a remote SOCKS5 proxy that requires username/password
//! authentication, optionally over TLS.
//!
//! ## Features
//!
//! - **Local SOCKS5 server**: NO AUTH and USERNAME/PASSWORD negotiation, CONNECT over IPv4 or domain names
//! - **Authenticated upstream**: RFC 1929 credentials are presented to the remote proxy on the client's behalf
//! - **TLS to the proxy**: optional rustls wrapping with custom trust and client certificates
//! - **Bounded workers**: a fixed number of concurrent sessions, further connections queue
//! - **Pluggable bridging**: the upstream strategy is a [`Socks5Bridge`] trait object
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksbridge::{load_config, AuthenticatingBridge, ProxyServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let bridge = Arc::new(AuthenticatingBridge::new(&config.proxy)?);
//!
//!     let mut server = ProxyServer::new(config.server, bridge);
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SMTP client -> Socksbridge (local, anonymous) -> Remote SOCKS5 proxy (authenticated) -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use bridge::{AuthenticatingBridge, Socks5Bridge, Upstream};
pub use client::Socks5Client;
pub use config::{load_config, Config};
pub use error::{BridgeError, ReplyCode};
pub use server::{ProxyServer, ServerState};

/// Version of the Socksbridge library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
