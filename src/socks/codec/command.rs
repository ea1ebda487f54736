//! Command request frames

use crate::error::{BridgeError, ReplyCode, Result};
use crate::socks::consts::*;
use crate::socks::types::{CommandRequest, SocksCommand, TargetAddr};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Name resolution used for domain name targets
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to one address, or `None` if it cannot be resolved
    async fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Resolver backed by the system's `getaddrinfo`, preferring IPv4 results
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        resolve_host(host).await
    }
}

/// Read a command request from the local client and resolve its target
///
/// Equivalent to [`read_command_frame`] followed by [`resolve_request`] with
/// the [`SystemResolver`].
pub async fn read_command_request<R>(reader: &mut R) -> Result<CommandRequest>
where
    R: AsyncRead + Unpin,
{
    let mut request = read_command_frame(reader).await?;
    resolve_request(&mut request, &SystemResolver).await;
    Ok(request)
}

/// Resolve the domain name of a request read by [`read_command_frame`]
///
/// An unresolvable name is recorded as a deferred HOST_UNREACHABLE reply.
/// Requests that already carry an address or a deferred reply are left alone.
pub async fn resolve_request(request: &mut CommandRequest, resolver: &dyn HostResolver) {
    if request.address.is_some() || request.deferred_reply.is_some() {
        return;
    }
    let Some(host) = request.host.as_deref() else {
        return;
    };

    match resolver.resolve(host).await {
        Some(ip) => request.address = Some(ip),
        None => request.deferred_reply = Some(ReplyCode::HostUnreachable),
    }
}

/// Read the bytes of a command request without resolving anything
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Unsupported address types are recorded on the returned request instead of
/// failing. For address types other than IPv4 and domain name, no address
/// bytes are consumed; the port is read regardless. Domain names are kept in
/// `host` with no address.
pub async fn read_command_frame<R>(reader: &mut R) -> Result<CommandRequest>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let version = header[0];
    let command = header[1];
    let address_type = header[3];

    if version != SOCKS5_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Unsupported SOCKS version in command: {}",
            version
        )));
    }

    let mut request = CommandRequest {
        command,
        address_type,
        host: None,
        address: None,
        port: 0,
        deferred_reply: None,
    };

    match address_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            request.address = Some(IpAddr::V4(Ipv4Addr::from(octets)));
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let domain_len = reader.read_u8().await? as usize;
            if domain_len == 0 {
                return Err(BridgeError::Protocol(
                    "Length of domain must be greater than 0".into(),
                ));
            }

            let mut domain = vec![0u8; domain_len];
            reader.read_exact(&mut domain).await?;
            request.host = Some(String::from_utf8_lossy(&domain).into_owned());
        }

        other => {
            debug!("Address type {:#04x} not supported, skipping address", other);
            request.deferred_reply = Some(ReplyCode::AddressTypeNotSupported);
        }
    }

    request.port = reader.read_u16().await?;

    Ok(request)
}

/// Resolve a host name, preferring IPv4 results
async fn resolve_host(host: &str) -> Option<IpAddr> {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            let ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
            ips.iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| ips.first())
                .copied()
        }
        Err(e) => {
            debug!("Failed to resolve {}: {}", host, e);
            None
        }
    }
}

/// Send a command request to a remote server
pub async fn write_command_request<W>(
    writer: &mut W,
    command: SocksCommand,
    target: &TargetAddr,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = vec![
        SOCKS5_VERSION,
        command.to_byte(),
        SOCKS5_RESERVED,
        target.addr_type(),
    ];

    match target {
        TargetAddr::Ip(SocketAddr::V4(addr)) => frame.extend_from_slice(&addr.ip().octets()),
        TargetAddr::Ip(SocketAddr::V6(addr)) => frame.extend_from_slice(&addr.ip().octets()),
        TargetAddr::Domain(domain, _) => {
            if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
                return Err(BridgeError::Protocol(format!(
                    "Invalid domain length: {}",
                    domain.len()
                )));
            }
            frame.push(domain.len() as u8);
            frame.extend_from_slice(domain.as_bytes());
        }
    }
    frame.extend_from_slice(&target.port().to_be_bytes());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
