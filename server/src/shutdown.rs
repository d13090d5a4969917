use std::time::Duration;

use tokio::time::sleep;

use crate::app::SharedState;

/// Grace period for loops and the HTTP server to observe cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

pub async fn graceful_shutdown(state: &SharedState) {
    tracing::info!("Shutdown sequence started");

    state.shutdown_token().cancel();
    tracing::info!("Shutdown: background loops cancelled");

    sleep(SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown sequence completed");
}
