//! What the daemon does with each accepted session.

use anyhow::{Context, Result};
use tokio::net::TcpStream;

use httptun_services::SessionStream;

const ECHO_BUF: usize = 32 * 1024;

/// Splice the session onto a fresh TCP connection to `upstream`.
pub async fn to_upstream(mut stream: SessionStream, upstream: &str) -> Result<(u64, u64)> {
    let mut tcp = TcpStream::connect(upstream)
        .await
        .with_context(|| format!("failed to connect upstream {}", upstream))?;
    tcp.set_nodelay(true)?;
    let counts = tokio::io::copy_bidirectional(&mut stream, &mut tcp).await?;
    Ok(counts)
}

/// Write every chunk read back to the client until end of stream.
pub async fn echo(mut stream: SessionStream) -> Result<u64> {
    let mut buf = vec![0u8; ECHO_BUF];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write(&buf[..n]).await?;
        total += n as u64;
    }
    Ok(total)
}
