//! Register / heartbeat / release.

use stage_db::{BroadcasterLease, Database, EventStatus};

use crate::{Clock, LeaseError, system_clock};

/// Result of an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Release {
    pub lease_deleted: bool,
    pub event_ended: bool,
}

#[derive(Clone)]
pub struct LeaseManager {
    db: Database,
    clock: Clock,
}

impl LeaseManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            clock: system_clock(),
        }
    }

    pub fn with_clock(db: Database, clock: Clock) -> Self {
        Self { db, clock }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn register_lease(
        &self,
        event_id: &str,
        broadcaster_id: &str,
    ) -> Result<BroadcasterLease, LeaseError> {
        self.register_lease_at(event_id, broadcaster_id, self.now())
    }

    /// Insert or take over the event's lease, stamping both timestamps with
    /// `now`. Empty identifiers are rejected.
    pub fn register_lease_at(
        &self,
        event_id: &str,
        broadcaster_id: &str,
        now: i64,
    ) -> Result<BroadcasterLease, LeaseError> {
        if let Some(existing) = self.db.get_lease(event_id)? {
            if existing.broadcaster_id != broadcaster_id {
                tracing::warn!(
                    event_id,
                    previous = %existing.broadcaster_id,
                    broadcaster_id,
                    "Lease taken over by another broadcaster"
                );
            }
        }
        let lease = self.db.upsert_lease(event_id, broadcaster_id, now)?;
        tracing::info!(event_id, broadcaster_id, "Broadcaster lease registered");
        Ok(lease)
    }

    pub fn heartbeat(&self, event_id: &str, broadcaster_id: &str) -> bool {
        self.heartbeat_at(event_id, broadcaster_id, self.now())
    }

    /// Renew the lease. Returns `false` when the write failed or no lease
    /// held by `broadcaster_id` exists; either way the next tick tries again.
    pub fn heartbeat_at(&self, event_id: &str, broadcaster_id: &str, now: i64) -> bool {
        match self.db.touch_lease(event_id, broadcaster_id, now) {
            Ok(true) => {
                tracing::trace!(event_id, "Heartbeat recorded");
                true
            }
            Ok(false) => {
                tracing::warn!(event_id, broadcaster_id, "Heartbeat found no lease");
                false
            }
            Err(e) => {
                tracing::warn!(event_id, broadcaster_id, error = %e, "Heartbeat write failed");
                false
            }
        }
    }

    pub fn release_lease(
        &self,
        event_id: &str,
        broadcaster_id: &str,
    ) -> Result<Release, LeaseError> {
        self.release_lease_at(event_id, broadcaster_id, self.now())
    }

    /// Delete the caller's lease and end the event.
    ///
    /// If another broadcaster has since taken the lease over, their event is
    /// left alone. Releasing twice is harmless.
    pub fn release_lease_at(
        &self,
        event_id: &str,
        broadcaster_id: &str,
        now: i64,
    ) -> Result<Release, LeaseError> {
        let lease_deleted = self.db.delete_lease(event_id, broadcaster_id)?;
        if !lease_deleted {
            if let Some(other) = self.db.get_lease(event_id)? {
                tracing::warn!(
                    event_id,
                    broadcaster_id,
                    holder = %other.broadcaster_id,
                    "Release skipped, lease held by another broadcaster"
                );
                return Ok(Release::default());
            }
        }
        let event_ended = self.db.mark_event_ended(event_id, now)?;
        tracing::info!(event_id, broadcaster_id, lease_deleted, event_ended, "Broadcast released");
        Ok(Release {
            lease_deleted,
            event_ended,
        })
    }

    pub fn go_live(
        &self,
        event_id: &str,
        broadcaster_id: &str,
    ) -> Result<BroadcasterLease, LeaseError> {
        self.go_live_at(event_id, broadcaster_id, self.now())
    }

    /// Register the lease, then mark the event live. Nothing is marked live
    /// unless registration succeeded.
    pub fn go_live_at(
        &self,
        event_id: &str,
        broadcaster_id: &str,
        now: i64,
    ) -> Result<BroadcasterLease, LeaseError> {
        let event = self
            .db
            .get_event(event_id)?
            .ok_or_else(|| LeaseError::EventNotFound(event_id.to_string()))?;
        if event.status == EventStatus::Ended {
            return Err(LeaseError::EventEnded(event_id.to_string()));
        }

        let lease = self.register_lease_at(event_id, broadcaster_id, now)?;
        if self.db.mark_event_live(event_id, now)? {
            tracing::info!(event_id, broadcaster_id, "Event is live");
        }
        Ok(lease)
    }
}
