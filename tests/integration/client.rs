use crate::*;

use httptun_client::{ClientError, TunnelConn};
use httptun_core::config::ClientConfig;
use httptun_core::wire::MAX_READ_BYTES;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

#[tokio::test]
async fn test_conn_round_trip() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);

    let mut conn = TunnelConn::connect(&server.url).await?;
    assert_eq!(conn.local_addr().to_string(), "http");
    assert_eq!(conn.local_addr().network(), "http");
    assert_eq!(conn.remote_addr().to_string(), server.url);
    assert!(server.listener.session(&conn.session_id()).is_ok());

    assert_eq!(conn.write(b"hello").await?, 5);
    let mut buf = [0u8; 1024];
    let n = conn.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"hello");

    // An empty buffer never reaches the server.
    assert_eq!(conn.read(&mut []).await?, 0);

    conn.close().await?;
    assert!(conn.is_closed());
    assert!(server.listener.is_empty());
    assert!(matches!(conn.read(&mut buf).await, Err(ClientError::Closed)));
    assert!(matches!(conn.write(b"x").await, Err(ClientError::Closed)));
    // Closing again is a no-op.
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_reads_are_bounded_by_buffer() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let mut conn = TunnelConn::connect(&server.url).await?;

    conn.write(b"abcdefghij").await?;
    let mut small = [0u8; 4];
    let mut got = Vec::new();
    while got.len() < 10 {
        let n = conn.read(&mut small).await?;
        assert!(n > 0 && n <= small.len());
        got.extend_from_slice(&small[..n]);
    }
    assert_eq!(got, b"abcdefghij");
    Ok(())
}

#[tokio::test]
async fn test_application_close_is_eof() -> Result<()> {
    let server = start_server().await?;
    let app = {
        let listener = server.listener.clone();
        tokio::spawn(async move {
            let mut stream = listener.accept().await?;
            stream.write(b"bye").await?;
            Ok::<_, httptun_core::TunnelError>(())
        })
    };

    let mut conn = TunnelConn::connect(&server.url).await?;
    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"bye");
    timeout(LIMIT, app).await???;

    assert_eq!(conn.read(&mut buf).await?, 0);
    assert_eq!(conn.read(&mut buf).await?, 0);
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_async_io_traits() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);
    let conn = TunnelConn::connect(&server.url).await?;

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let (mut rd, mut wr) = tokio::io::split(conn);

    let expected = payload.clone();
    let reader = tokio::spawn(async move {
        let mut got = vec![0u8; expected.len()];
        rd.read_exact(&mut got).await.map(|_| got)
    });

    for chunk in payload.chunks(7_000) {
        wr.write_all(chunk).await?;
    }
    wr.flush().await?;

    let got = timeout(LIMIT, reader).await???;
    assert_eq!(got, payload);

    wr.shutdown().await?;
    assert!(server.listener.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_read_timeout() -> Result<()> {
    let server = start_server().await?;
    let _held = {
        let listener = server.listener.clone();
        tokio::spawn(async move {
            // Accept and sit on the stream without writing.
            let stream = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        })
    };

    let mut conn = TunnelConn::connect(&server.url).await?;
    conn.set_read_timeout(Some(Duration::from_millis(200)));
    let mut buf = [0u8; 8];
    let err = timeout(LIMIT, conn.read(&mut buf)).await?.unwrap_err();
    assert!(matches!(err, ClientError::TimedOut), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn test_from_config_and_refusal() -> Result<()> {
    let server = start_server().await?;
    let _echo = spawn_echo(&server.listener);

    let config = ClientConfig {
        endpoint: server.url.clone(),
        request_timeout_secs: 5,
    };
    let mut conn = TunnelConn::from_config(&config).await?;
    conn.write(b"cfg").await?;
    let mut buf = [0u8; 8];
    let n = conn.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"cfg");

    // Close behind the connection's back; its next request is refused.
    server.listener.close_session(&conn.session_id())?;
    let err = conn.write(b"late").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::RemoteRefused { status } if status == StatusCode::BAD_REQUEST
    ));
    Ok(())
}

#[tokio::test]
async fn test_connect_after_listener_close() -> Result<()> {
    let server = start_server().await?;
    server.listener.close().await;

    let err = TunnelConn::connect(&server.url).await.err().context("connect succeeded")?;
    assert!(matches!(
        err,
        ClientError::RemoteRefused { status } if status == StatusCode::SERVICE_UNAVAILABLE
    ));
    Ok(())
}

#[tokio::test]
async fn test_timed_out_write_is_withdrawn() -> Result<()> {
    let server = start_server().await?;
    let acceptor = {
        let listener = server.listener.clone();
        tokio::spawn(async move { listener.accept().await })
    };
    let mut conn = TunnelConn::connect(&server.url).await?;
    let mut stream = timeout(LIMIT, acceptor).await???;
    let session = server.listener.session(&conn.session_id())?;

    // Nobody reads, so the PUT times out and the client hangs up.
    conn.set_write_timeout(Some(Duration::from_millis(100)));
    let err = conn.write(b"stale").await.unwrap_err();
    assert!(matches!(err, ClientError::TimedOut), "got {err:?}");

    // Wait for the server to drop the abandoned request.
    timeout(LIMIT, async {
        while session.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    conn.set_write_timeout(None);
    let writer = tokio::spawn(async move {
        conn.write(b"fresh").await?;
        Ok::<_, ClientError>(conn)
    });
    let mut buf = [0u8; 64];
    let n = timeout(LIMIT, stream.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"fresh");
    let mut conn = timeout(LIMIT, writer).await???;
    conn.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_writes_larger_than_one_request() -> Result<()> {
    let server = start_server().await?;
    let big = vec![0x5au8; MAX_READ_BYTES + 10];
    let expected = 2 * big.len() - 10;

    let app = {
        let listener = server.listener.clone();
        tokio::spawn(async move {
            let mut stream = listener.accept().await?;
            let mut buf = vec![0u8; 1024 * 1024];
            let mut total = 0;
            while total < expected {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                assert!(buf[..n].iter().all(|&b| b == 0x5a));
                total += n;
            }
            Ok::<_, httptun_core::TunnelError>(total)
        })
    };

    let mut conn = TunnelConn::connect(&server.url).await?;
    // The inherent write splits into several requests.
    assert_eq!(conn.write(&big).await?, big.len());
    // A single trait write sends one request's worth and reports a short write.
    assert_eq!(AsyncWriteExt::write(&mut conn, &big).await?, MAX_READ_BYTES);

    let total = timeout(LIMIT, app).await???;
    assert_eq!(total, expected);
    conn.close().await?;
    Ok(())
}
