//! Bidirectional relay between the client and the upstream connection

use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes copied by one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to upstream
    pub sent: u64,
    /// Upstream to client
    pub received: u64,
    /// Time spent relaying
    pub elapsed: Duration,
}

impl fmt::Display for RelayStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} bytes, received {} bytes in {:.3}s",
            self.sent,
            self.received,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Relay data bidirectionally between two streams
///
/// Both directions run concurrently, each with its own buffer of
/// `buffer_size` bytes. When either direction reaches EOF or fails, both
/// write halves are shut down so the two connections close together.
pub async fn relay<A, B>(client: A, upstream: B, buffer_size: usize) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut sent = 0u64;
    let mut received = 0u64;

    let result = {
        let client_to_upstream = pipe(&mut client_read, &mut upstream_write, buffer_size, &mut sent);
        let upstream_to_client =
            pipe(&mut upstream_read, &mut client_write, buffer_size, &mut received);

        tokio::select! {
            result = client_to_upstream => {
                debug!("Client side finished first: {:?}", result);
                result
            }
            result = upstream_to_client => {
                debug!("Upstream side finished first: {:?}", result);
                result
            }
        }
    };

    // One side is done; close the other as well
    let _ = upstream_write.shutdown().await;
    let _ = client_write.shutdown().await;

    result.map(|()| RelayStats {
        sent,
        received,
        elapsed: started.elapsed(),
    })
}

/// Copy until EOF, counting bytes as they are written
async fn pipe<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
