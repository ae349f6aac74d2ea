//! The four session verbs.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use httptun_core::wire::SESSION_HEADER;
use httptun_services::TunnelListener;

use super::{read_length, reject, session_id};

// ── POST ──────────────────────────────────────────────────────────────────────

/// Create a session. Blocks until the application accepts it.
pub async fn handle_create(listener: &TunnelListener) -> Result<Response, (StatusCode, String)> {
    let id = listener.create_session().await.map_err(reject)?;
    Ok((StatusCode::CREATED, [(SESSION_HEADER, id.to_hex())]).into_response())
}

// ── PUT ───────────────────────────────────────────────────────────────────────

/// Write the whole request body into the session.
pub async fn handle_write(
    listener: &TunnelListener,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, (StatusCode, String)> {
    let id = session_id(headers)?;
    let session = listener.session(&id).map_err(reject)?;
    session.write_from_client(body).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── GET ───────────────────────────────────────────────────────────────────────

/// One read of at most `X-Content-Length` bytes. An empty body means the
/// session reached end of stream.
pub async fn handle_read(
    listener: &TunnelListener,
    headers: &HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let id = session_id(headers)?;
    let session = listener.session(&id).map_err(reject)?;
    let max = read_length(headers)?;

    let chunk = session.read_for_client(max).await.map_err(reject)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_LENGTH, chunk.len().to_string())],
        chunk,
    )
        .into_response())
}

// ── DELETE ────────────────────────────────────────────────────────────────────

pub fn handle_close(
    listener: &TunnelListener,
    headers: &HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let id = session_id(headers)?;
    listener.close_session(&id).map_err(reject)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
