use crate::*;

use httptun_core::SessionId;
use tokio::time::timeout;

#[tokio::test]
async fn test_hello_round_trip() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);

    let id = server.open().await?;
    assert_eq!(id.len(), 64);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    assert_eq!(server.put(&id, "hello").await?, StatusCode::NO_CONTENT);
    let (status, body) = server.get(&id, "1024").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");

    assert_eq!(server.delete(&id).await?, StatusCode::NO_CONTENT);
    assert!(server.listener.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_read_never_exceeds_requested_length() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let id = server.open().await?;

    assert_eq!(server.put(&id, "hello world").await?, StatusCode::NO_CONTENT);
    let (status, first) = server.get(&id, "5").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&first[..], b"hello");
    let (_, rest) = server.get(&id, "100").await?;
    assert_eq!(&rest[..], b" world");
    Ok(())
}

#[tokio::test]
async fn test_create_waits_for_accept() -> Result<()> {
    let server = start_server().await?;

    let pending = {
        let http = server.http.clone();
        let url = server.url.clone();
        tokio::spawn(async move { http.post(url).send().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished(), "create answered before accept");

    let stream = timeout(LIMIT, server.listener.accept()).await??;
    let resp = timeout(LIMIT, pending).await???;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = resp.headers().get(SESSION_HEADER).context("no x-session")?;
    assert_eq!(id.to_str()?, stream.id().to_hex());
    Ok(())
}

#[tokio::test]
async fn test_read_length_out_of_range() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let id = server.open().await?;

    for bad in ["0", "16777217", "-1", "lots"] {
        let (status, _) = server.get(&id, bad).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "length {bad:?}");
    }
    let status = server
        .raw(Method::GET, &[(SESSION_HEADER, id.as_str())])
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "missing x-content-length");

    // The session survives rejected reads.
    assert_eq!(server.put(&id, "ok").await?, StatusCode::NO_CONTENT);
    let (_, body) = server.get(&id, "16777216").await?;
    assert_eq!(&body[..], b"ok");
    Ok(())
}

#[tokio::test]
async fn test_unknown_and_malformed_session_ids() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let live = server.open().await?;

    let unknown = SessionId::generate().to_hex();
    assert_eq!(server.put(&unknown, "x").await?, StatusCode::BAD_REQUEST);
    assert_eq!(server.get(&unknown, "16").await?.0, StatusCode::BAD_REQUEST);
    assert_eq!(server.delete(&unknown).await?, StatusCode::BAD_REQUEST);

    for bad in ["", "zz", "abcd"] {
        assert_eq!(server.delete(bad).await?, StatusCode::BAD_REQUEST, "id {bad:?}");
    }
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let status = server.raw(method.clone(), &[(READ_LENGTH_HEADER, "16")]).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method} without x-session");
    }

    assert_eq!(server.listener.len(), 1);
    assert!(server.listener.sessions().contains_key(&SessionId::parse(&live)?));
    Ok(())
}

#[tokio::test]
async fn test_unsupported_method() -> Result<()> {
    let server = start_server().await?;
    let status = server.raw(Method::PATCH, &[]).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_close_then_stale_id() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let id = server.open().await?;

    assert_eq!(server.delete(&id).await?, StatusCode::NO_CONTENT);
    assert_eq!(server.delete(&id).await?, StatusCode::BAD_REQUEST);
    assert_eq!(server.get(&id, "1024").await?.0, StatusCode::BAD_REQUEST);
    assert_eq!(server.put(&id, "late").await?, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_sessions_are_isolated() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let a = server.open().await?;
    let b = server.open().await?;
    assert_ne!(a, b);

    assert_eq!(server.put(&a, "alpha").await?, StatusCode::NO_CONTENT);
    assert_eq!(server.put(&b, "bravo").await?, StatusCode::NO_CONTENT);
    assert_eq!(&server.get(&b, "64").await?.1[..], b"bravo");
    assert_eq!(&server.get(&a, "64").await?.1[..], b"alpha");

    assert_eq!(server.delete(&a).await?, StatusCode::NO_CONTENT);
    assert_eq!(server.put(&b, "still here").await?, StatusCode::NO_CONTENT);
    assert_eq!(&server.get(&b, "64").await?.1[..], b"still here");
    Ok(())
}

#[tokio::test]
async fn test_application_close_reads_as_eof() -> Result<()> {
    let server = start_server().await?;
    let acceptor = {
        let listener = server.listener.clone();
        tokio::spawn(async move { listener.accept().await })
    };
    let id = server.open().await?;
    let mut stream = timeout(LIMIT, acceptor).await???;

    let blocked = {
        let http = server.http.clone();
        let url = server.url.clone();
        let id = id.clone();
        tokio::spawn(async move {
            http.get(url)
                .header(SESSION_HEADER, id)
                .header(READ_LENGTH_HEADER, "64")
                .send()
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.close();

    let resp = timeout(LIMIT, blocked).await???;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.bytes().await?.is_empty());

    // Later reads keep reporting end of stream until the client closes.
    let (status, body) = server.get(&id, "64").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(server.delete(&id).await?, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn test_create_after_listener_close() -> Result<()> {
    let server = start_server().await?;
    server.listener.close().await;

    let (status, id) = server.create().await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(id.is_none());
    assert!(server.listener.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cors_exposes_session_header() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);

    let resp = server
        .http
        .post(&server.url)
        .header("origin", "http://app.example")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let exposed = resp
        .headers()
        .get("access-control-expose-headers")
        .context("no expose-headers")?
        .to_str()?
        .to_ascii_lowercase();
    assert!(exposed.contains(SESSION_HEADER), "exposed: {exposed}");
    Ok(())
}
