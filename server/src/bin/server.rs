//! Headless server binary.
//!
//! Starts the axum web server, the reaper, reconciler and presence prune
//! loops, and waits for Ctrl+C.

use tracing_subscriber::EnvFilter;

use stage_server::app::SharedState;
use stage_server::shutdown::graceful_shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting livestage server");

    let (db, config, dir) = stage_server::init_foundation()?;
    let state = SharedState::new(db, config, dir);

    let server_handle = stage_server::spawn_background_tasks(&state);

    tracing::info!(
        port = state.server_port(),
        data_dir = %state.data_dir().display(),
        "Server running. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    graceful_shutdown(&state).await;
    if let Err(e) = server_handle.await {
        tracing::warn!("Server task ended abnormally: {e}");
    }
    Ok(())
}
