//! Application side of an accepted session.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use httptun_core::{SessionId, StreamBridge, TunnelAddr, TunnelError};

use crate::session::Session;

/// A session as seen by the code that called `accept`.
///
/// Implements `AsyncRead + AsyncWrite`. The inherent `read`/`write` methods
/// go straight to the pipe; don't interleave them with the trait methods,
/// which may hold bytes back between calls.
///
/// Closing or dropping the stream closes the session; the remote client then
/// reads end of stream. The table entry stays until the client deletes it
/// or the reaper sweeps it.
pub struct SessionStream {
    session: Arc<Session>,
    bridge: StreamBridge,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    closed: bool,
}

impl SessionStream {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            bridge: StreamBridge::new(),
            read_timeout: None,
            write_timeout: None,
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn local_addr(&self) -> TunnelAddr {
        TunnelAddr::Local
    }

    /// The hex session id stands in for the peer address.
    pub fn remote_addr(&self) -> TunnelAddr {
        TunnelAddr::Remote(self.session.id().to_hex())
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
    }

    /// Read bytes written by the remote client. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if self.closed {
            return Err(TunnelError::Closed);
        }
        let end = self.session.server_end();
        let chunk = with_deadline(self.read_timeout, end.read_chunk(buf.len())).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Write all of `data`; completes once the remote client has read it.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, TunnelError> {
        if self.closed {
            return Err(TunnelError::Closed);
        }
        let end = self.session.server_end();
        with_deadline(self.write_timeout, end.write_all(Bytes::copy_from_slice(data))).await?;
        Ok(data.len())
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.session.is_closed() {
            self.session.close();
            tracing::info!(session_id = %self.session.id(), "session closed by application");
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn with_deadline<T, F>(limit: Option<Duration>, op: F) -> Result<T, TunnelError>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| TunnelError::TimedOut)?,
        None => op.await,
    };
    result.map_err(|e| match e.kind() {
        io::ErrorKind::BrokenPipe => TunnelError::Closed,
        _ => TunnelError::InternalFailure(e.to_string()),
    })
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // A stream shut down mid-copy reads as end of stream.
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        let session = &this.session;
        let limit = this.read_timeout;
        this.bridge.poll_read(cx, buf, move |max| {
            let end = session.server_end().clone();
            Box::pin(async move {
                with_deadline(limit, end.read_chunk(max))
                    .await
                    .map_err(io::Error::from)
            })
        })
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(TunnelError::Closed.into()));
        }
        let session = &this.session;
        let limit = this.write_timeout;
        this.bridge.poll_write(cx, data, move |data| {
            let end = session.server_end().clone();
            Box::pin(async move {
                let len = data.len();
                with_deadline(limit, end.write_all(data))
                    .await
                    .map(|()| len)
                    .map_err(io::Error::from)
            })
        })
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().bridge.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.bridge.poll_flush(cx))?;
        this.close();
        Poll::Ready(Ok(()))
    }
}
