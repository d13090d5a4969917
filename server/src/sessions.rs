//! Client session wiring: a connection controller plus the store-side
//! bookkeeping that goes with it.
//!
//! A [`ViewerSession`] keeps the viewer's presence row fresh while the
//! controller plays the stream. A [`BroadcasterSession`] takes the event live
//! and heartbeats its lease once the host has joined. Both watch the event
//! row and close themselves when it becomes `ended`, whether the broadcaster
//! stopped or the reaper voided the lease.

mod broadcaster;
mod viewer;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use stage_client::{ClientError, ConnectionState, TokenIssuer, TransportFactory};
use stage_db::{Database, DbError, Event, EventStatus, RowChangeFilter, Table};
use stage_lease::LeaseError;
use stage_presence::PresenceError;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;

pub use broadcaster::BroadcasterSession;
pub use viewer::ViewerSession;

/// Everything a session needs from the host application.
#[derive(Clone)]
pub struct SessionContext {
    pub db: Database,
    pub factory: Arc<dyn TransportFactory>,
    pub issuer: Arc<dyn TokenIssuer>,
    pub config: AppConfig,
    /// Cancelling this stops every session started with the context.
    pub shutdown: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Event already ended: {0}")]
    EventEnded(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// The event a new session may attach to.
fn open_event(db: &Database, event_id: &str) -> Result<Event, SessionError> {
    let event = db
        .get_event(event_id)?
        .ok_or_else(|| SessionError::EventNotFound(event_id.to_string()))?;
    if event.status == EventStatus::Ended {
        return Err(SessionError::EventEnded(event_id.to_string()));
    }
    Ok(event)
}

/// Resolves with `true` once the event row is `ended` or gone, or `false`
/// if `cancel` fired first.
async fn wait_for_end(db: &Database, event_id: &str, cancel: &CancellationToken) -> bool {
    // Subscribe before the first read so no transition is missed.
    let mut changes = db.subscribe_changes();
    let filter = RowChangeFilter::row(Table::Events, event_id);

    loop {
        match db.get_event(event_id) {
            Ok(Some(event)) if event.status != EventStatus::Ended => {}
            Ok(_) => return true,
            Err(e) => tracing::warn!(event_id, "Failed to read event: {e}"),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                change = changes.recv() => match change {
                    Ok(change) if filter.matches(&change) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(event_id, skipped, "Change feed lagged, re-reading event");
                        break;
                    }
                    Err(RecvError::Closed) => return false,
                },
            }
        }
    }
}

fn log_state(role: &'static str, event_id: String) -> impl Fn(&ConnectionState) + Send + Sync {
    move |state| {
        tracing::debug!(
            role,
            event_id = %event_id,
            phase = ?state.phase,
            retry_count = state.retry_count,
            "Connection state changed"
        );
    }
}
