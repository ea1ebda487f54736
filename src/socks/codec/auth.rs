//! Username/password sub-negotiation frames (RFC 1929)

use crate::error::{BridgeError, Result};
use crate::socks::consts::{SOCKS5_AUTH_FAILURE, SOCKS5_AUTH_SUCCESS, SOCKS5_AUTH_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read a username/password request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub async fn read_username_password_auth<R>(reader: &mut R) -> Result<(String, String)>
where
    R: AsyncRead + Unpin,
{
    let version = reader.read_u8().await?;
    if version != SOCKS5_AUTH_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Invalid auth version: {}",
            version
        )));
    }

    let username = read_field(reader).await?;
    let password = read_field(reader).await?;

    Ok((username, password))
}

async fn read_field<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    // RFC 1929 fields are opaque octets
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write the sub-negotiation status
pub async fn write_auth_result<W>(writer: &mut W, success: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status = if success {
        SOCKS5_AUTH_SUCCESS
    } else {
        SOCKS5_AUTH_FAILURE
    };
    writer.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    writer.flush().await?;
    Ok(())
}

/// Send credentials to a remote server
pub async fn write_username_password_auth<W>(
    writer: &mut W,
    username: &str,
    password: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let ulen = u8::try_from(username.len())
        .map_err(|_| BridgeError::Protocol("Username is too long".into()))?;
    let plen = u8::try_from(password.len())
        .map_err(|_| BridgeError::Protocol("Password is too long".into()))?;

    let mut frame = Vec::with_capacity(3 + username.len() + password.len());
    frame.push(SOCKS5_AUTH_VERSION);
    frame.push(ulen);
    frame.extend_from_slice(username.as_bytes());
    frame.push(plen);
    frame.extend_from_slice(password.as_bytes());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the status a remote server returned; `true` means accepted
pub async fn read_auth_result<R>(reader: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await?;

    if buf[0] != SOCKS5_AUTH_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Invalid auth version: {}",
            buf[0]
        )));
    }

    Ok(buf[1] == SOCKS5_AUTH_SUCCESS)
}
