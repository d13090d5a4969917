//! Viewer join / ping / leave.

use stage_db::{Clock, Database, system_clock};

use crate::{IdentityKey, PresenceError};

#[derive(Clone)]
pub struct PresenceTracker {
    db: Database,
    clock: Clock,
}

impl PresenceTracker {
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

    /// Mark the identity present. The cached counter is bumped only when the
    /// identity was not already active, so a second tab does not count twice.
    /// Returns whether this was an arrival.
    pub fn join(&self, event_id: &str, identity: &IdentityKey) -> Result<bool, PresenceError> {
        let now = self.now();
        self.db
            .get_event(event_id)?
            .ok_or_else(|| PresenceError::EventNotFound(event_id.to_string()))?;
        let arrived = self.db.upsert_presence(
            event_id,
            identity.as_str(),
            identity.user_id(),
            identity.device_key(),
            now,
        )?;
        if arrived {
            self.db.increment_viewer_count(event_id, now)?;
            tracing::debug!(event_id, identity = %identity, "Viewer joined");
        }
        Ok(arrived)
    }

    /// Liveness ping. `false` means the record is gone or inactive and the
    /// caller should join again.
    pub fn ping(&self, event_id: &str, identity: &IdentityKey) -> Result<bool, PresenceError> {
        Ok(self
            .db
            .touch_presence(event_id, identity.as_str(), self.now())?)
    }

    /// Ping, rejoining if the record was pruned or deactivated meanwhile.
    pub fn ping_or_join(&self, event_id: &str, identity: &IdentityKey) -> Result<(), PresenceError> {
        if !self.ping(event_id, identity)? {
            tracing::debug!(event_id, identity = %identity, "Presence lost, rejoining");
            self.join(event_id, identity)?;
        }
        Ok(())
    }

    /// Mark the identity departed and decrement the cached counter, once.
    pub fn leave(&self, event_id: &str, identity: &IdentityKey) -> Result<bool, PresenceError> {
        let now = self.now();
        let left = self.db.deactivate_presence(event_id, identity.as_str(), now)?;
        if left {
            self.db.decrement_viewer_count(event_id, now)?;
            tracing::debug!(event_id, identity = %identity, "Viewer left");
        }
        Ok(left)
    }
}
