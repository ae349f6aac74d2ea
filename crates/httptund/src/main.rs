//! httptund — serve the HTTP tunnel endpoint and bridge each session.

use std::path::PathBuf;

use anyhow::{Context, Result};

use httptun_core::config::TunnelConfig;
use httptun_core::TunnelError;
use httptun_services::TunnelListener;

mod bridge;

fn config_arg() -> Result<Option<PathBuf>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut path = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                path = Some(PathBuf::from(
                    args.get(i).context("--config requires a path")?,
                ));
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
        i += 1;
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let config = match config_arg()? {
        Some(path) => TunnelConfig::load_from(path.clone())
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            if let Err(e) = TunnelConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            TunnelConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load config, using defaults");
                TunnelConfig::default()
            })
        }
    };

    let upstream = config.daemon.upstream.trim().to_string();
    if upstream.is_empty() {
        tracing::info!("no upstream configured, echoing sessions");
    } else {
        tracing::info!(upstream = %upstream, "bridging sessions to upstream");
    }

    let listener = TunnelListener::listen();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let reaper_task = config.server.idle_timeout().map(|max_idle| {
        tracing::info!(
            idle_secs = max_idle.as_secs(),
            interval_secs = config.server.reap_interval().as_secs(),
            "idle reaper enabled"
        );
        listener.spawn_reaper(max_idle, config.server.reap_interval())
    });

    let server_task = {
        let listener = listener.clone();
        let server = config.server.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let stop = async move {
                let _ = shutdown_rx.recv().await;
            };
            httptun_api::serve(listener, server, stop).await
        })
    };

    let accept_task = {
        let listener = listener.clone();
        tokio::spawn(accept_loop(listener, upstream))
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = accept_task        => tracing::error!("accept loop exited: {:?}", r),
    }

    // Hanging reads would otherwise hold graceful shutdown open.
    listener.close().await;
    let live: Vec<_> = listener.sessions().iter().map(|e| *e.key()).collect();
    for id in live {
        let _ = listener.close_session(&id);
    }
    let _ = shutdown_tx.send(());

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "tunnel endpoint failed"),
        Err(e) => tracing::error!(error = %e, "tunnel endpoint task panicked"),
    }
    if let Some(task) = reaper_task {
        let _ = task.await;
    }

    Ok(())
}

async fn accept_loop(listener: TunnelListener, upstream: String) {
    loop {
        let stream = match listener.accept().await {
            Ok(stream) => stream,
            Err(TunnelError::ListenerClosed) => return,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        let session_id = stream.id();
        let upstream = upstream.clone();
        tokio::spawn(async move {
            let result = if upstream.is_empty() {
                bridge::echo(stream).await.map(|n| (n, n))
            } else {
                bridge::to_upstream(stream, &upstream).await
            };
            match result {
                Ok((sent, received)) => {
                    tracing::info!(session_id = %session_id, sent, received, "session finished")
                }
                Err(e) => tracing::warn!(session_id = %session_id, error = %e, "session failed"),
            }
        });
    }
}
