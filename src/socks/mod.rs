//! SOCKS5 protocol module for Socksbridge
//!
//! Frame encoding and decoding for both sides of the bridge: the local
//! anonymous server facing the SMTP client, and the outbound client facing
//! the authenticated remote proxy.

pub mod codec;
mod consts;
mod types;

pub use consts::*;
pub use types::{AuthMethod, CommandRequest, SocksCommand, TargetAddr};
