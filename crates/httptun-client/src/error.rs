use std::io;

use reqwest::StatusCode;

use httptun_core::WireError;

/// Failures of a client-side tunnel operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with anything but the operation's success status.
    #[error("remote refused request: {status}")]
    RemoteRefused { status: StatusCode },

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("http transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("create response carried no x-session header")]
    MissingSessionId,

    #[error("invalid session id from server: {0}")]
    InvalidSessionId(#[from] WireError),

    #[error("read response has a missing or invalid content-length")]
    BadContentLength,

    #[error("read response of {got} bytes exceeds the {requested} requested")]
    OversizedBody { requested: usize, got: usize },

    #[error("operation timed out")]
    TimedOut,

    #[error("connection closed")]
    Closed,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::TimedOut
        } else {
            ClientError::Transport(e)
        }
    }
}

impl From<ClientError> for io::Error {
    fn from(e: ClientError) -> Self {
        let kind = match &e {
            ClientError::RemoteRefused { .. } => io::ErrorKind::ConnectionRefused,
            ClientError::Transport(_) => io::ErrorKind::ConnectionAborted,
            ClientError::TimedOut => io::ErrorKind::TimedOut,
            ClientError::Closed => io::ErrorKind::NotConnected,
            ClientError::InvalidUrl(_) => io::ErrorKind::InvalidInput,
            ClientError::MissingSessionId
            | ClientError::InvalidSessionId(_)
            | ClientError::BadContentLength
            | ClientError::OversizedBody { .. } => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}
