//! Poll-based adapter over async tunnel operations.
//!
//! Both ends of a tunnel expose their I/O as `async fn`s (an HTTP round trip
//! on the client, a pipe rendezvous on the server). `StreamBridge` keeps the
//! in-flight future and any unread bytes so those operations can back an
//! `AsyncRead + AsyncWrite` implementation.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::ReadBuf;

/// Boxed I/O future owned by the bridge between polls.
pub type IoFuture<T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'static>>;

/// In-flight state for one stream.
///
/// A read future returning an empty chunk marks end of stream.
#[derive(Default)]
pub struct StreamBridge {
    read_buf: Bytes,
    read_eof: bool,
    pending_read: Option<IoFuture<Bytes>>,
    pending_write: Option<IoFuture<usize>>,
    pending_shutdown: Option<IoFuture<()>>,
    write_closed: bool,
}

impl StreamBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll a read. `start` is called with the free space in `buf` when no
    /// read is in flight.
    pub fn poll_read<F>(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
        start: F,
    ) -> Poll<io::Result<()>>
    where
        F: FnOnce(usize) -> IoFuture<Bytes>,
    {
        if !self.read_buf.is_empty() {
            self.drain_into(buf);
            return Poll::Ready(Ok(()));
        }
        if self.read_eof || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let remaining = buf.remaining();
        let fut = self.pending_read.get_or_insert_with(|| start(remaining));
        let result = ready!(fut.as_mut().poll(cx));
        self.pending_read = None;

        match result {
            Ok(chunk) if chunk.is_empty() => self.read_eof = true,
            Ok(chunk) => {
                self.read_buf = chunk;
                self.drain_into(buf);
            }
            Err(e) => return Poll::Ready(Err(e)),
        }
        Poll::Ready(Ok(()))
    }

    /// Poll a write. `start` receives a copy of `data` when no write is in
    /// flight; the in-flight write's result is returned once it resolves.
    pub fn poll_write<F>(
        &mut self,
        cx: &mut Context<'_>,
        data: &[u8],
        start: F,
    ) -> Poll<io::Result<usize>>
    where
        F: FnOnce(Bytes) -> IoFuture<usize>,
    {
        if self.pending_write.is_none() {
            if self.write_closed {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "tunnel stream shut down",
                )));
            }
            if data.is_empty() {
                return Poll::Ready(Ok(0));
            }
        }

        let fut = self
            .pending_write
            .get_or_insert_with(|| start(Bytes::copy_from_slice(data)));
        let result = ready!(fut.as_mut().poll(cx));
        self.pending_write = None;
        Poll::Ready(result)
    }

    /// Drive any in-flight write to completion.
    pub fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(fut) = self.pending_write.as_mut() {
            let result = ready!(fut.as_mut().poll(cx));
            self.pending_write = None;
            result?;
        }
        Poll::Ready(Ok(()))
    }

    /// Flush, then run the close future once.
    pub fn poll_shutdown<F>(&mut self, cx: &mut Context<'_>, start: F) -> Poll<io::Result<()>>
    where
        F: FnOnce() -> IoFuture<()>,
    {
        ready!(self.poll_flush(cx))?;
        if self.write_closed && self.pending_shutdown.is_none() {
            return Poll::Ready(Ok(()));
        }

        let fut = self.pending_shutdown.get_or_insert_with(start);
        let result = ready!(fut.as_mut().poll(cx));
        self.pending_shutdown = None;
        self.write_closed = true;
        Poll::Ready(result)
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let n = self.read_buf.len().min(buf.remaining());
        buf.put_slice(&self.read_buf.split_to(n));
    }
}
