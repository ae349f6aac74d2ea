//! Session state and the shared session table.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

use httptun_core::{SessionId, TunnelError};

use crate::pipe::{pipe, PipeEnd};

/// Server-side state for one tunnel.
///
/// The client-facing end is driven by HTTP requests; the server-facing end
/// belongs to the application through the accepted [`SessionStream`].
///
/// [`SessionStream`]: crate::SessionStream
pub struct Session {
    id: SessionId,
    client_end: PipeEnd,
    server_end: PipeEnd,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last request start or finish.
    last_active_ms: AtomicU64,
    in_flight: AtomicUsize,
    /// Set once `accept` has handed the session to the application.
    published: AtomicBool,
}

/// The session table, shared across all request handlers.
pub type SessionTable = Arc<DashMap<SessionId, Arc<Session>>>;

/// Create a new empty session table.
pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let (client_end, server_end) = pipe();
        Self {
            id,
            client_end,
            server_end,
            created_at: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            published: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn server_end(&self) -> &PipeEnd {
        &self.server_end
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the last request touched this session.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Number of HTTP requests currently operating on this session.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.client_end.is_closed()
    }

    /// True once an `accept` call has taken this session.
    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Mark the session accepted. Idle time restarts from here.
    pub(crate) fn publish(&self) {
        self.touch();
        self.published.store(true, Ordering::Release);
    }

    /// Copy a full request body into the session (PUT).
    pub async fn write_from_client(&self, body: Bytes) -> Result<(), TunnelError> {
        let _activity = self.activity();
        let len = body.len();
        self.client_end
            .write_all(body)
            .await
            .map_err(|e| TunnelError::InternalFailure(e.to_string()))?;
        tracing::debug!(session_id = %self.id, bytes = len, "client write delivered");
        Ok(())
    }

    /// One blocking read of at most `max` bytes for the client (GET).
    /// An empty result means the session reached end of stream.
    pub async fn read_for_client(&self, max: usize) -> Result<Bytes, TunnelError> {
        let _activity = self.activity();
        let chunk = self
            .client_end
            .read_chunk(max)
            .await
            .map_err(|e| TunnelError::InternalFailure(e.to_string()))?;
        tracing::debug!(session_id = %self.id, requested = max, bytes = chunk.len(), "client read served");
        Ok(chunk)
    }

    /// Close both ends. Idempotent.
    pub fn close(&self) {
        self.client_end.close();
        self.server_end.close();
    }

    fn touch(&self) {
        let now = self.created_at.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn activity(&self) -> Activity<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.touch();
        Activity { session: self }
    }
}

/// Marks a request as in flight for the idle reaper.
struct Activity<'a> {
    session: &'a Session,
}

impl Drop for Activity<'_> {
    fn drop(&mut self) {
        self.session.touch();
        self.session.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
