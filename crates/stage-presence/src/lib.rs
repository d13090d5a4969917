//! Viewer presence tracking and viewer-count reconciliation.
//!
//! Presence records are the ground truth for who is watching; the event's
//! `viewer_count` is a cache. Reconciliation corrects the cache upward
//! immediately and downward only once a lower count has held for two
//! consecutive passes.

pub mod identity;
pub mod reconcile;
pub mod task;
pub mod tracker;

use std::time::Duration;

pub use identity::IdentityKey;
pub use reconcile::{Decision, Reconciler, Reconciliation, decide, distinct_viewers, reconcile_event};
pub use task::ReconcilerTask;
pub use tracker::PresenceTracker;

use stage_db::{Database, DbError};

/// Records not seen within this window are treated as departed.
pub const DEFAULT_PRESENCE_WINDOW: Duration = Duration::from_secs(120);

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("Viewer has neither a user id nor a device key")]
    MissingIdentity,

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Delete presence records for `event_id` last seen more than `older_than`
/// before `now`. Returns the number removed.
pub fn prune_departed(
    db: &Database,
    event_id: &str,
    older_than: Duration,
    now: i64,
) -> Result<usize, PresenceError> {
    let cutoff = now - older_than.as_secs() as i64;
    let removed = db.prune_presence(event_id, cutoff)?;
    if removed > 0 {
        tracing::debug!(event_id, removed, "Pruned departed presence records");
    }
    Ok(removed)
}
