//! Greeting and method selection frames

use crate::error::{BridgeError, Result};
use crate::socks::consts::SOCKS5_VERSION;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read a client greeting and return the offered method bytes
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub async fn read_greeting<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let version = reader.read_u8().await?;
    if version != SOCKS5_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Unsupported SOCKS version: {}",
            version
        )));
    }

    let num_methods = reader.read_u8().await? as usize;
    let mut methods = vec![0u8; num_methods];
    reader.read_exact(&mut methods).await?;

    Ok(methods)
}

/// Answer a greeting with the chosen method (0xFF when none is acceptable)
pub async fn write_method_selection<W>(writer: &mut W, method: u8) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[SOCKS5_VERSION, method]).await?;
    writer.flush().await?;
    Ok(())
}

/// Send a greeting offering `methods` to a remote server
pub async fn write_greeting<W>(writer: &mut W, methods: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let count = u8::try_from(methods.len())
        .map_err(|_| BridgeError::Protocol(format!("Too many methods: {}", methods.len())))?;

    let mut frame = Vec::with_capacity(2 + methods.len());
    frame.push(SOCKS5_VERSION);
    frame.push(count);
    frame.extend_from_slice(methods);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the method a remote server selected
pub async fn read_method_selection<R>(reader: &mut R) -> Result<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf).await?;

    if buf[0] != SOCKS5_VERSION {
        return Err(BridgeError::Protocol(format!(
            "Unsupported SOCKS version: {}",
            buf[0]
        )));
    }

    Ok(buf[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::consts::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_greeting_reads_exactly_declared_methods() {
        for count in [0usize, 1, 2, 17, 255] {
            let mut frame = vec![SOCKS5_VERSION, count as u8];
            frame.extend((0..count).map(|i| i as u8));
            // Trailing bytes belong to the next frame
            frame.extend_from_slice(&[0xAA, 0xBB]);

            let mut cursor = Cursor::new(frame);
            let methods = read_greeting(&mut cursor).await.unwrap();

            assert_eq!(methods.len(), count);
            assert_eq!(cursor.position() as usize, 2 + count);
        }
    }

    #[tokio::test]
    async fn test_read_greeting_bad_version() {
        let mut cursor = Cursor::new(vec![0x04, 1, SOCKS5_AUTH_METHOD_NONE]);
        let err = read_greeting(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported SOCKS version: 4"));
    }

    #[tokio::test]
    async fn test_read_greeting_truncated() {
        let mut cursor = Cursor::new(vec![SOCKS5_VERSION, 3, SOCKS5_AUTH_METHOD_NONE]);
        let err = read_greeting(&mut cursor).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedEof));

        let mut cursor = Cursor::new(vec![SOCKS5_VERSION]);
        let err = read_greeting(&mut cursor).await.unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_write_method_selection() {
        let mut buffer = Vec::new();
        write_method_selection(&mut buffer, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE)
            .await
            .unwrap();
        assert_eq!(buffer, vec![0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_write_greeting() {
        let mut buffer = Vec::new();
        write_greeting(
            &mut buffer,
            &[SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD],
        )
        .await
        .unwrap();
        assert_eq!(buffer, vec![0x05, 0x02, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_read_method_selection() {
        let mut cursor = Cursor::new(vec![SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD]);
        assert_eq!(
            read_method_selection(&mut cursor).await.unwrap(),
            SOCKS5_AUTH_METHOD_PASSWORD
        );

        let mut cursor = Cursor::new(vec![SOCKS5_VERSION]);
        assert!(matches!(
            read_method_selection(&mut cursor).await.unwrap_err(),
            BridgeError::UnexpectedEof
        ));
    }
}
