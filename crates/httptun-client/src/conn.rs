//! Client end of a tunnel session.
//!
//! Each stream operation is one HTTP request carrying the session id:
//! reads are GETs, writes are PUTs and close is a DELETE. Requests on one
//! handle are issued one at a time.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use httptun_core::config::ClientConfig;
use httptun_core::wire::{
    MAX_READ_BYTES, READ_LENGTH_HEADER, SESSION_HEADER, SOCKET_CONTENT_TYPE,
};
use httptun_core::{SessionId, StreamBridge, TunnelAddr};

use crate::error::ClientError;

// ── Remote session ────────────────────────────────────────────────────────────

/// What a request needs to address the session. Cloned into each request
/// future started by the `AsyncRead`/`AsyncWrite` impls.
#[derive(Clone)]
struct Remote {
    http: reqwest::Client,
    url: Url,
    session: SessionId,
}

impl Remote {
    fn request(&self, method: Method, timeout: Option<Duration>) -> RequestBuilder {
        let req = self
            .http
            .request(method, self.url.clone())
            .header(SESSION_HEADER, self.session.to_hex());
        match timeout {
            Some(limit) => req.timeout(limit),
            None => req,
        }
    }

    /// One GET. An empty chunk is end of stream.
    async fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Bytes, ClientError> {
        let want = max.min(MAX_READ_BYTES);
        let resp = self
            .request(Method::GET, timeout)
            .header(READ_LENGTH_HEADER, want.to_string())
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(ClientError::RemoteRefused {
                status: resp.status(),
            });
        }

        let declared = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or(ClientError::BadContentLength)?;
        if declared > want {
            return Err(ClientError::OversizedBody {
                requested: want,
                got: declared,
            });
        }

        let body = resp.bytes().await?;
        if body.len() > want {
            return Err(ClientError::OversizedBody {
                requested: want,
                got: body.len(),
            });
        }
        Ok(body)
    }

    /// One PUT carrying all of `data`.
    async fn write(&self, data: Bytes, timeout: Option<Duration>) -> Result<usize, ClientError> {
        let len = data.len();
        let resp = self.request(Method::PUT, timeout).body(data).send().await?;
        if resp.status() != StatusCode::NO_CONTENT {
            return Err(ClientError::RemoteRefused {
                status: resp.status(),
            });
        }
        Ok(len)
    }

    async fn close(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        let resp = self.request(Method::DELETE, timeout).send().await?;
        if resp.status() != StatusCode::NO_CONTENT {
            return Err(ClientError::RemoteRefused {
                status: resp.status(),
            });
        }
        Ok(())
    }
}

// ── TunnelConn ────────────────────────────────────────────────────────────────

/// A connected tunnel session.
///
/// Implements `AsyncRead + AsyncWrite`; shutting down the write side closes
/// the whole session. Dropping an open connection sends a best-effort
/// DELETE when a Tokio runtime is available.
pub struct TunnelConn {
    remote: Remote,
    bridge: StreamBridge,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    closed: bool,
}

impl TunnelConn {
    /// Create a session at `url` with a default HTTP client.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        Self::connect_with(reqwest::Client::new(), url).await
    }

    /// Create a session at `url`, sending every request through `http`.
    ///
    /// Completes only once the server application has accepted the session.
    pub async fn connect_with(http: reqwest::Client, url: &str) -> Result<Self, ClientError> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let resp = http
            .post(url.clone())
            .header(CONTENT_TYPE, SOCKET_CONTENT_TYPE)
            .send()
            .await?;
        if resp.status() != StatusCode::CREATED {
            return Err(ClientError::RemoteRefused {
                status: resp.status(),
            });
        }

        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .ok_or(ClientError::MissingSessionId)?
            .to_str()
            .map_err(|_| ClientError::MissingSessionId)?
            .parse::<SessionId>()?;
        tracing::debug!(session_id = %session, url = %url, "tunnel session created");

        Ok(Self {
            remote: Remote { http, url, session },
            bridge: StreamBridge::new(),
            read_timeout: None,
            write_timeout: None,
            closed: false,
        })
    }

    /// Connect to `config.endpoint`, applying its request timeout to reads
    /// and writes.
    pub async fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut conn = Self::connect(&config.endpoint).await?;
        conn.set_timeout(config.request_timeout());
        Ok(conn)
    }

    pub fn session_id(&self) -> SessionId {
        self.remote.session
    }

    pub fn local_addr(&self) -> TunnelAddr {
        TunnelAddr::Local
    }

    /// The endpoint URL stands in for the peer address.
    pub fn remote_addr(&self) -> TunnelAddr {
        TunnelAddr::Remote(self.remote.url.to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
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

    /// Read up to `buf.len()` bytes. Returns 0 at end of stream, or
    /// immediately when `buf` is empty.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = self.remote.read(buf.len(), self.read_timeout).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Write all of `data`, one request per `MAX_READ_BYTES`. Completes once
    /// the server application has consumed it.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        let mut rest = Bytes::copy_from_slice(data);
        while !rest.is_empty() {
            let chunk = rest.split_to(rest.len().min(MAX_READ_BYTES));
            self.remote.write(chunk, self.write_timeout).await?;
        }
        Ok(data.len())
    }

    /// Close the session. The handle is closed afterwards even if the
    /// request fails; closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.remote.close(self.write_timeout).await
    }
}

impl Drop for TunnelConn {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let remote = self.remote.clone();
            handle.spawn(async move {
                if let Err(e) = remote.close(None).await {
                    tracing::debug!(session_id = %remote.session, error = %e, "close on drop failed");
                }
            });
        }
    }
}

impl AsyncRead for TunnelConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        let remote = &this.remote;
        let limit = this.read_timeout;
        this.bridge.poll_read(cx, buf, move |max| {
            let remote = remote.clone();
            Box::pin(async move { remote.read(max, limit).await.map_err(io::Error::from) })
        })
    }
}

impl AsyncWrite for TunnelConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(ClientError::Closed.into()));
        }
        // One PUT per write, capped at MAX_READ_BYTES; the caller resends the rest.
        let data = &data[..data.len().min(MAX_READ_BYTES)];
        let remote = &this.remote;
        let limit = this.write_timeout;
        this.bridge.poll_write(cx, data, move |data| {
            let remote = remote.clone();
            Box::pin(async move { remote.write(data, limit).await.map_err(io::Error::from) })
        })
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().bridge.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Ok(()));
        }
        let remote = &this.remote;
        let limit = this.write_timeout;
        let result = std::task::ready!(this.bridge.poll_shutdown(cx, move || {
            let remote = remote.clone();
            Box::pin(async move { remote.close(limit).await.map_err(io::Error::from) })
        }));
        this.closed = true;
        Poll::Ready(result)
    }
}
