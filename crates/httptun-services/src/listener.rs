//! Tunnel listener: hands newly created sessions to `accept` callers.
//!
//! Creation and acceptance meet at a rendezvous: a create request stays
//! blocked until an `accept` call has taken its session, so the number of
//! created-but-unaccepted sessions is bounded by the number of blocked
//! creators.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use httptun_core::{SessionId, TunnelAddr, TunnelError};

use crate::session::{new_session_table, Session, SessionTable};
use crate::stream::SessionStream;

/// A freshly created session waiting for `accept`.
struct Handoff {
    session: Arc<Session>,
    accepted: oneshot::Sender<()>,
}

struct Inner {
    sessions: SessionTable,
    handoff_tx: mpsc::Sender<Handoff>,
    handoff_rx: Mutex<mpsc::Receiver<Handoff>>,
    closed: watch::Sender<bool>,
}

/// Server side of the tunnel. Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct TunnelListener {
    inner: Arc<Inner>,
}

impl Default for TunnelListener {
    fn default() -> Self {
        Self::listen()
    }
}

impl TunnelListener {
    /// Create a listener with an empty session table.
    pub fn listen() -> Self {
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                sessions: new_session_table(),
                handoff_tx,
                handoff_rx: Mutex::new(handoff_rx),
                closed: watch::channel(false).0,
            }),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn addr(&self) -> TunnelAddr {
        TunnelAddr::Local
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Look up a live session.
    pub fn session(&self, id: &SessionId) -> Result<Arc<Session>, TunnelError> {
        self.inner
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| unknown_session(id))
    }

    /// Create a session and wait until an `accept` call has taken it.
    ///
    /// The session is in the table before it becomes visible to `accept`.
    /// If the listener closes first, or this future is dropped, the session
    /// is closed and removed again.
    pub async fn create_session(&self) -> Result<SessionId, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::ListenerClosed);
        }

        let session = loop {
            let id = SessionId::generate();
            if let Entry::Vacant(slot) = self.inner.sessions.entry(id) {
                let session = Arc::new(Session::new(id));
                slot.insert(session.clone());
                break session;
            }
        };
        let id = session.id();
        let mut pending = Unpublished {
            sessions: &self.inner.sessions,
            session: Some(session.clone()),
        };

        let mut closed = self.inner.closed.subscribe();
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let handoff = Handoff {
            session,
            accepted: accepted_tx,
        };

        let queued = tokio::select! {
            biased;
            sent = self.inner.handoff_tx.send(handoff) => sent.is_ok(),
            _ = wait_closed(&mut closed) => false,
        };
        let accepted = queued
            && tokio::select! {
                biased;
                ack = accepted_rx => ack.is_ok(),
                _ = wait_closed(&mut closed) => false,
            };

        if !accepted {
            tracing::debug!(session_id = %id, "listener closed before session was accepted");
            return Err(TunnelError::ListenerClosed);
        }

        pending.session = None;
        tracing::info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Wait for the next created session.
    ///
    /// Sessions are delivered in creation order, each to exactly one caller.
    /// Returns `ListenerClosed` once the listener is closed.
    pub async fn accept(&self) -> Result<SessionStream, TunnelError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TunnelError::ListenerClosed);
        }

        let mut rx = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => return Err(TunnelError::ListenerClosed),
            rx = self.inner.handoff_rx.lock() => rx,
        };

        loop {
            let handoff = tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => return Err(TunnelError::ListenerClosed),
                handoff = rx.recv() => handoff.ok_or(TunnelError::ListenerClosed)?,
            };

            // The creator gave up (request dropped); its session is already gone.
            if handoff.accepted.send(()).is_err() {
                tracing::debug!(session_id = %handoff.session.id(), "skipping abandoned session");
                continue;
            }

            handoff.session.publish();
            tracing::info!(session_id = %handoff.session.id(), "session accepted");
            return Ok(SessionStream::new(handoff.session));
        }
    }

    /// Close and remove one session (DELETE).
    pub fn close_session(&self, id: &SessionId) -> Result<(), TunnelError> {
        let (_, session) = self
            .inner
            .sessions
            .remove(id)
            .ok_or_else(|| unknown_session(id))?;
        session.close();
        tracing::info!(session_id = %id, "session closed");
        Ok(())
    }

    /// Stop accepting. Pending and future creates fail; accepted sessions
    /// keep working until closed individually.
    pub async fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }

        let mut rx = self.inner.handoff_rx.lock().await;
        rx.close();
        // Dropping queued handoffs fails their creators.
        while rx.try_recv().is_ok() {}
        tracing::info!(live_sessions = self.len(), "listener closed");
    }

    /// Close and remove sessions idle for at least `max_idle`, plus sessions
    /// the application already closed. Sessions with a request in flight, or
    /// not yet accepted, are never reaped. Returns the number removed.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .filter(|e| reapable(e.value(), max_idle))
            .map(|e| *e.key())
            .collect();

        let mut reaped = 0;
        for id in stale {
            let removed = self
                .inner
                .sessions
                .remove_if(&id, |_, s| reapable(s, max_idle));
            if let Some((_, session)) = removed {
                session.close();
                reaped += 1;
                tracing::info!(
                    session_id = %id,
                    idle_secs = session.idle_for().as_secs(),
                    "idle session reaped"
                );
            }
        }
        reaped
    }

    /// Run `reap_idle` every `interval` until the listener closes.
    pub fn spawn_reaper(&self, max_idle: Duration, interval: Duration) -> JoinHandle<()> {
        let listener = self.clone();
        let mut closed = self.inner.closed.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = wait_closed(&mut closed) => {
                        tracing::debug!("session reaper stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let reaped = listener.reap_idle(max_idle);
                        if reaped > 0 {
                            tracing::info!(reaped, live = listener.len(), "reaper sweep");
                        }
                    }
                }
            }
        })
    }
}

/// Removes a created session again unless it was handed to `accept`.
struct Unpublished<'a> {
    sessions: &'a SessionTable,
    session: Option<Arc<Session>>,
}

impl Drop for Unpublished<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            self.sessions.remove(&session.id());
        }
    }
}

/// Unaccepted sessions belong to their blocked creator, which removes them.
fn reapable(session: &Session, max_idle: Duration) -> bool {
    session.is_published()
        && session.in_flight() == 0
        && (session.is_closed() || session.idle_for() >= max_idle)
}

fn unknown_session(id: &SessionId) -> TunnelError {
    TunnelError::Malformed(format!("unknown session {:?}", id))
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
