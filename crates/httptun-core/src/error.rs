//! Server-side error taxonomy.

use crate::wire::WireError;

/// Failures of a session or listener operation.
///
/// The protocol handler maps each variant onto one HTTP status:
/// `Malformed` and `Closed` → 400, `InternalFailure` → 500,
/// `ListenerClosed` → 503.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Bad or missing headers, unknown session, out-of-range length.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The paired endpoint could not complete a read or write.
    #[error("internal failure: {0}")]
    InternalFailure(String),

    /// The session was closed before or during the operation.
    #[error("session closed")]
    Closed,

    #[error("listener closed")]
    ListenerClosed,

    #[error("operation timed out")]
    TimedOut,
}

impl From<WireError> for TunnelError {
    fn from(e: WireError) -> Self {
        TunnelError::Malformed(e.to_string())
    }
}

impl From<TunnelError> for std::io::Error {
    fn from(e: TunnelError) -> Self {
        use std::io::ErrorKind;
        let kind = match e {
            TunnelError::Malformed(_) => ErrorKind::InvalidInput,
            TunnelError::InternalFailure(_) => ErrorKind::Other,
            TunnelError::Closed | TunnelError::ListenerClosed => ErrorKind::BrokenPipe,
            TunnelError::TimedOut => ErrorKind::TimedOut,
        };
        std::io::Error::new(kind, e)
    }
}
