//! Paired endpoint, an in-process, unbuffered, full-duplex pipe.
//!
//! Each direction is a rendezvous: `write_all` hands its bytes to the other
//! end and returns only after reads on that end have taken every byte. A
//! read takes at most the requested number of bytes from the pending write
//! and never waits for more once it has something.
//!
//! A write that is cancelled before a reader takes its bytes is withdrawn;
//! none of its pending bytes are delivered.
//!
//! Closing either end wakes every blocked party. Readers then see end of
//! stream (an empty chunk) and writers get `BrokenPipe`.

use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

/// A pending write waiting to be picked up by a reader.
struct Offer {
    data: Bytes,
    taken: oneshot::Sender<usize>,
}

/// One direction of the pipe.
struct Lane {
    tx: mpsc::Sender<Offer>,
    rx: Mutex<mpsc::Receiver<Offer>>,
    /// Serializes writers so one write's bytes are never interleaved.
    write_lock: Mutex<()>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
            write_lock: Mutex::new(()),
        }
    }
}

struct Shared {
    /// `lanes[i]` carries bytes written by end `i`.
    lanes: [Lane; 2],
    /// `done[i]` flips to true when end `i` is closed.
    done: [watch::Sender<bool>; 2],
}

/// One end of a paired endpoint. Clones refer to the same end.
#[derive(Clone)]
pub struct PipeEnd {
    shared: Arc<Shared>,
    side: usize,
}

/// Create a connected pair of pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let shared = Arc::new(Shared {
        lanes: [Lane::new(), Lane::new()],
        done: [watch::channel(false).0, watch::channel(false).0],
    });
    (
        PipeEnd {
            shared: shared.clone(),
            side: 0,
        },
        PipeEnd { shared, side: 1 },
    )
}

impl PipeEnd {
    fn peer(&self) -> usize {
        1 - self.side
    }

    fn local_closed(&self) -> bool {
        *self.shared.done[self.side].borrow()
    }

    fn remote_closed(&self) -> bool {
        *self.shared.done[self.peer()].borrow()
    }

    /// True if either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.local_closed() || self.remote_closed()
    }

    /// Close this end. Idempotent.
    pub fn close(&self) {
        self.shared.done[self.side].send_replace(true);
    }

    /// Read at most `max` bytes written by the other end.
    ///
    /// Blocks until a write is pending or the pipe closes. Returns an empty
    /// chunk at end of stream; `max == 0` also returns an empty chunk.
    pub async fn read_chunk(&self, max: usize) -> io::Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if self.remote_closed() {
            return Ok(Bytes::new());
        }
        if self.local_closed() {
            return Err(closed_pipe());
        }

        let lane = &self.shared.lanes[self.peer()];
        let mut local = self.shared.done[self.side].subscribe();
        let mut remote = self.shared.done[self.peer()].subscribe();

        let mut rx = tokio::select! {
            biased;
            _ = wait_done(&mut remote) => return Ok(Bytes::new()),
            _ = wait_done(&mut local) => return Err(closed_pipe()),
            rx = lane.rx.lock() => rx,
        };

        loop {
            let offer = tokio::select! {
                biased;
                offer = rx.recv() => match offer {
                    Some(offer) => offer,
                    None => return Ok(Bytes::new()),
                },
                _ = wait_done(&mut remote) => return Ok(Bytes::new()),
                _ = wait_done(&mut local) => return Err(closed_pipe()),
            };

            // A writer that gave up (timeout, dropped request) has dropped its
            // receiver; its bytes are withdrawn.
            let n = max.min(offer.data.len());
            if offer.taken.send(n).is_ok() {
                return Ok(offer.data.slice(..n));
            }
        }
    }

    /// Read into `buf`, returning the number of bytes copied (0 at end of stream).
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.read_chunk(buf.len()).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Write every byte of `data`, blocking until the other end has read it all.
    pub async fn write_all(&self, data: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_pipe());
        }

        let lane = &self.shared.lanes[self.side];
        let mut local = self.shared.done[self.side].subscribe();
        let mut remote = self.shared.done[self.peer()].subscribe();

        let _writer = tokio::select! {
            biased;
            _ = wait_done(&mut local) => return Err(closed_pipe()),
            _ = wait_done(&mut remote) => return Err(closed_pipe()),
            guard = lane.write_lock.lock() => guard,
        };

        let mut rest = data;
        while !rest.is_empty() {
            let (taken_tx, taken_rx) = oneshot::channel();
            let offer = Offer {
                data: rest.clone(),
                taken: taken_tx,
            };

            tokio::select! {
                biased;
                sent = lane.tx.send(offer) => sent.map_err(|_| closed_pipe())?,
                _ = wait_done(&mut local) => return Err(closed_pipe()),
                _ = wait_done(&mut remote) => return Err(closed_pipe()),
            }

            let n = tokio::select! {
                biased;
                taken = taken_rx => taken.map_err(|_| closed_pipe())?,
                _ = wait_done(&mut local) => return Err(closed_pipe()),
                _ = wait_done(&mut remote) => return Err(closed_pipe()),
            };
            rest.advance(n);
        }
        Ok(())
    }
}

/// Resolve once the watched end has been closed.
async fn wait_done(rx: &mut watch::Receiver<bool>) {
    loop {
        let done = *rx.borrow_and_update();
        if done {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "io on closed pipe")
}
