//! HTTP wire contract for the tunnel protocol.
//!
//! Every stream operation is one request against a single endpoint:
//!
//!   POST   → 201, `X-Session: <64 hex chars>`
//!   GET    → 200, body of at most `X-Content-Length` bytes
//!   PUT    → 204, request body written to the session
//!   DELETE → 204, session closed
//!
//! Header names are lowercase so they can be used with `HeaderName::from_static`.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

/// Request/response header carrying the hex session identifier.
pub const SESSION_HEADER: &str = "x-session";

/// Request header carrying the maximum number of bytes a GET may return.
pub const READ_LENGTH_HEADER: &str = "x-content-length";

/// Content type sent with create requests.
pub const SOCKET_CONTENT_TYPE: &str = "application/x-socket";

/// Upper bound for a single read request (16 MiB).
pub const MAX_READ_BYTES: usize = 16 * 1024 * 1024;

/// Length of a raw session identifier in bytes.
pub const SESSION_ID_LEN: usize = 32;

/// Network name reported by tunnel addresses.
pub const NETWORK: &str = "http";

// ── Session identifier ────────────────────────────────────────────────────────

/// A 32-byte random session identifier, lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    /// Draw a fresh identifier from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form sent in `X-Session`.
    pub fn parse(hex_str: &str) -> Result<Self, WireError> {
        let bytes = hex::decode(hex_str).map_err(|_| WireError::InvalidHex)?;
        if bytes.len() != SESSION_ID_LEN {
            return Err(WireError::WrongLength(bytes.len()));
        }
        let mut arr = [0u8; SESSION_ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl FromStr for SessionId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to correlate log lines.
        write!(f, "SessionId({}…)", &self.to_hex()[..16])
    }
}

// ── Read length ───────────────────────────────────────────────────────────────

/// Parse an `X-Content-Length` value. Valid range is `1..=MAX_READ_BYTES`.
pub fn parse_read_length(value: &str) -> Result<usize, WireError> {
    let n: u64 = value
        .trim()
        .parse()
        .map_err(|_| WireError::InvalidReadLength(value.to_string()))?;
    if n == 0 || n > MAX_READ_BYTES as u64 {
        return Err(WireError::ReadLengthOutOfRange(n));
    }
    Ok(n as usize)
}

// ── Addresses ─────────────────────────────────────────────────────────────────

/// Address of either end of a tunnel.
///
/// The tunnel has no meaningful local socket, so the local side is always
/// the `http` sentinel. The remote side is the target URL on the client and
/// the hex session id on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelAddr {
    Local,
    Remote(String),
}

impl TunnelAddr {
    pub fn network(&self) -> &'static str {
        NETWORK
    }
}

impl fmt::Display for TunnelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelAddr::Local => f.write_str(NETWORK),
            TunnelAddr::Remote(addr) => f.write_str(addr),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while interpreting wire-level headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("session id is not valid hex")]
    InvalidHex,

    #[error("session id must be {} bytes, got {0}", SESSION_ID_LEN)]
    WrongLength(usize),

    #[error("read length is not an integer: {0:?}")]
    InvalidReadLength(String),

    #[error("read length {0} outside 1..={}", MAX_READ_BYTES)]
    ReadLengthOutOfRange(u64),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
