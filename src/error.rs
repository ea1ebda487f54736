//! Error types for Socksbridge
//!
//! This module defines the error taxonomy shared by the codec, the outbound
//! client, the connection handler and the proxy server, together with the
//! SOCKS5 reply codes those errors map onto.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// IO error other than a short read
    #[error("IO error: {0}")]
    Io(io::Error),

    /// Malformed or unexpected wire bytes
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The stream ended in the middle of a frame
    #[error("Protocol error: unexpected end of stream")]
    UnexpectedEof,

    /// IPv6 or an unknown address type was requested
    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    /// A domain name target could not be resolved
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    /// The remote proxy accepted none of the offered methods
    #[error("NO ACCEPTABLE METHODS")]
    NoAcceptableAuthMethods,

    /// The remote proxy rejected the configured credentials
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The remote proxy answered CONNECT with a failure reply
    #[error("SOCKS server reply: {0}")]
    SocksServerReply(ReplyCode),

    /// The accept loop died of an IO error that was not caused by `stop()`
    #[error("Server crashed: {0}")]
    ServerCrashed(#[source] io::Error),

    /// A lifecycle method was called in the wrong state
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            BridgeError::UnexpectedEof
        } else {
            BridgeError::Io(err)
        }
    }
}

impl BridgeError {
    /// The reply code a SOCKS5 server should send back for this error
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            BridgeError::SocksServerReply(code) => *code,
            BridgeError::UnsupportedAddressType(_) => ReplyCode::AddressTypeNotSupported,
            BridgeError::HostUnreachable(_) => ReplyCode::HostUnreachable,
            BridgeError::Timeout(_) => ReplyCode::HostUnreachable,
            BridgeError::Io(err) => ReplyCode::from(err),
            _ => ReplyCode::GeneralFailure,
        }
    }
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    /// Human readable description of the reply
    pub fn message(self) -> &'static str {
        match self {
            ReplyCode::Succeeded => "Succeeded",
            ReplyCode::GeneralFailure => "General SOCKS server failure",
            ReplyCode::ConnectionNotAllowed => "Connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "Network unreachable",
            ReplyCode::HostUnreachable => "Host unreachable",
            ReplyCode::ConnectionRefused => "Connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "Command not supported",
            ReplyCode::AddressTypeNotSupported => "Address type not supported",
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = BridgeError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ReplyCode::Succeeded),
            0x01 => Ok(ReplyCode::GeneralFailure),
            0x02 => Ok(ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(ReplyCode::NetworkUnreachable),
            0x04 => Ok(ReplyCode::HostUnreachable),
            0x05 => Ok(ReplyCode::ConnectionRefused),
            0x06 => Ok(ReplyCode::TtlExpired),
            0x07 => Ok(ReplyCode::CommandNotSupported),
            0x08 => Ok(ReplyCode::AddressTypeNotSupported),
            other => Err(BridgeError::Protocol(format!("Unknown reply: {:#04x}", other))),
        }
    }
}

impl From<&io::Error> for ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => ReplyCode::GeneralFailure,
        }
    }
}
