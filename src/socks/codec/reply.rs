//! Command reply frames

use crate::error::{BridgeError, ReplyCode, Result};
use crate::socks::consts::*;
use crate::socks::types::TargetAddr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write a command reply to the local client
///
/// The bridge always answers with an IPv4 bind address, so the frame is
/// exactly 10 bytes. IPv6 bind addresses are reported as their mapped IPv4
/// form, or as `0.0.0.0` when they have none.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   |    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn write_command_reply<W>(
    writer: &mut W,
    reply: ReplyCode,
    bind_addr: SocketAddr,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let ip = match bind_addr.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
    };

    let mut frame = [0u8; SOCKS5_IPV4_REPLY_LEN];
    frame[0] = SOCKS5_VERSION;
    frame[1] = reply.into();
    frame[2] = SOCKS5_RESERVED;
    frame[3] = SOCKS5_ADDR_TYPE_IPV4;
    frame[4..8].copy_from_slice(&ip.octets());
    frame[8..10].copy_from_slice(&bind_addr.port().to_be_bytes());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a command reply from a remote server
///
/// Remote proxies may report any address type, so the full bound address is
/// consumed before the tunnel is handed over.
pub async fn read_command_reply<R>(reader: &mut R) -> Result<(ReplyCode, TargetAddr)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Unsupported SOCKS version in reply: {}",
            header[0]
        )));
    }
    let reply = ReplyCode::try_from(header[1])?;

    let bound = match header[3] {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            let port = reader.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            let port = reader.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        SOCKS5_ADDR_TYPE_DOMAIN => {
            let len = reader.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            reader.read_exact(&mut domain).await?;
            let port = reader.read_u16().await?;
            TargetAddr::Domain(String::from_utf8_lossy(&domain).into_owned(), port)
        }
        other => {
            return Err(BridgeError::UnsupportedAddressType(other));
        }
    };

    Ok((reply, bound))
}
