//! Protocol handler. Translates one HTTP request into one session operation.

pub mod session;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;

use httptun_core::wire::{parse_read_length, WireError, READ_LENGTH_HEADER, SESSION_HEADER};
use httptun_core::{SessionId, TunnelError};
use httptun_services::TunnelListener;

pub use session::{handle_close, handle_create, handle_read, handle_write};

/// Single entry point for the tunnel endpoint; dispatches on the verb.
pub async fn handle_tunnel(
    State(listener): State<TunnelListener>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, (StatusCode, String)> {
    match method {
        Method::POST => handle_create(&listener).await,
        Method::PUT => handle_write(&listener, &headers, body).await,
        Method::GET => handle_read(&listener, &headers).await,
        Method::DELETE => handle_close(&listener, &headers),
        other => {
            tracing::debug!(method = %other, "unsupported tunnel method");
            Err((StatusCode::BAD_REQUEST, format!("unsupported method {}", other)))
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Map a session/listener failure onto its status code.
fn reject(err: TunnelError) -> (StatusCode, String) {
    let status = match &err {
        TunnelError::Malformed(_) | TunnelError::Closed => StatusCode::BAD_REQUEST,
        TunnelError::InternalFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TunnelError::ListenerClosed => StatusCode::SERVICE_UNAVAILABLE,
        TunnelError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
    };
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %err, "tunnel request failed");
    }
    (status, err.to_string())
}

/// Parse the `X-Session` header.
fn session_id(headers: &HeaderMap) -> Result<SessionId, (StatusCode, String)> {
    let value = headers
        .get(SESSION_HEADER)
        .ok_or_else(|| reject(WireError::MissingHeader(SESSION_HEADER).into()))?;
    let text = value
        .to_str()
        .map_err(|_| reject(WireError::InvalidHex.into()))?;
    SessionId::parse(text).map_err(|e| reject(e.into()))
}

/// Parse the `X-Content-Length` header of a read.
fn read_length(headers: &HeaderMap) -> Result<usize, (StatusCode, String)> {
    let value = headers
        .get(READ_LENGTH_HEADER)
        .ok_or_else(|| reject(WireError::MissingHeader(READ_LENGTH_HEADER).into()))?;
    let text = value
        .to_str()
        .map_err(|_| reject(WireError::InvalidReadLength("<non-ascii>".into()).into()))?;
    parse_read_length(text).map_err(|e| reject(e.into()))
}
