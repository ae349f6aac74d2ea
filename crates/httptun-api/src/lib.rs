pub mod handlers;

use std::future::Future;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::any;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use httptun_core::config::ServerConfig;
use httptun_core::wire::SESSION_HEADER;
use httptun_services::TunnelListener;

/// Build the router mounting the tunnel endpoint at `config.path`.
///
/// Every method is routed to the one handler, which answers unsupported
/// methods with 400 itself.
pub fn router(listener: TunnelListener, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(
            &config.path,
            any(handlers::handle_tunnel).layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .with_state(listener)
        .layer(cors)
}

pub async fn serve<F>(listener: TunnelListener, config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(listener, &config);

    let tcp = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %tcp.local_addr()?, path = %config.path, "tunnel endpoint listening");
    axum::serve(tcp, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
