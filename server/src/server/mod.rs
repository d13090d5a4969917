//! HTTP surface: status, event inspection and the admin API.

pub mod api;
pub mod router;

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;

use crate::app::SharedState;

/// Serve until the shutdown token fires, then drain in-flight requests.
pub async fn start_server(state: SharedState) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, state.server_port()));
    let stop = state.shutdown_token().clone();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router::create_router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
