//! Broadcaster liveness leases.
//!
//! A broadcaster that goes live holds a lease row for its event and renews
//! it on a fixed interval. The reaper ends events whose lease went stale,
//! so a crashed broadcaster cannot leave an event marked live forever.

pub mod guard;
pub mod heartbeat;
pub mod manager;
pub mod reaper;

pub use guard::BroadcastLease;
pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatTask};
pub use manager::{LeaseManager, Release};
pub use reaper::{ReapReason, ReapReport, ReapedEvent, ReaperPolicy, reap_stale_leases};

pub use stage_db::{Clock, system_clock};

use stage_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Event already ended: {0}")]
    EventEnded(String),

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for LeaseError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InvalidData(msg) => Self::InvalidArgument(msg),
            other => Self::Db(other),
        }
    }
}
