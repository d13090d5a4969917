//! Broadcaster lease rows.

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::changes::{ChangeKind, Table};
use crate::{Database, DbError, require_id};

/// "This broadcaster is live for this event", valid while the heartbeat is
/// fresh. The primary key on `event_id` keeps at most one lease per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterLease {
    pub event_id: String,
    pub broadcaster_id: String,
    pub registered_at: i64,
    pub last_heartbeat: i64,
}

impl BroadcasterLease {
    /// Seconds since the last heartbeat.
    pub fn heartbeat_age(&self, now: i64) -> i64 {
        (now - self.last_heartbeat).max(0)
    }
}

fn lease_from_row(row: &Row<'_>) -> rusqlite::Result<BroadcasterLease> {
    Ok(BroadcasterLease {
        event_id: row.get(0)?,
        broadcaster_id: row.get(1)?,
        registered_at: row.get(2)?,
        last_heartbeat: row.get(3)?,
    })
}

impl Database {
    /// Insert or replace the lease for `event_id`, stamping both
    /// `registered_at` and `last_heartbeat` with `now`.
    pub fn upsert_lease(
        &self,
        event_id: &str,
        broadcaster_id: &str,
        now: i64,
    ) -> Result<BroadcasterLease, DbError> {
        require_id("event_id", event_id)?;
        require_id("broadcaster_id", broadcaster_id)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO broadcaster_leases (event_id, broadcaster_id, registered_at, last_heartbeat)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(event_id) DO UPDATE SET
                    broadcaster_id = excluded.broadcaster_id,
                    registered_at = excluded.registered_at,
                    last_heartbeat = excluded.last_heartbeat",
                rusqlite::params![event_id, broadcaster_id, now],
            )?;
            Ok(())
        })?;
        self.notify(Table::BroadcasterLeases, event_id, ChangeKind::Inserted);
        Ok(BroadcasterLease {
            event_id: event_id.to_string(),
            broadcaster_id: broadcaster_id.to_string(),
            registered_at: now,
            last_heartbeat: now,
        })
    }

    /// Refresh `last_heartbeat` on the lease held by `broadcaster_id`.
    ///
    /// Returns `false` when no matching lease exists (never registered,
    /// released, reaped, or taken over by another broadcaster). The
    /// heartbeat never moves backwards.
    pub fn touch_lease(
        &self,
        event_id: &str,
        broadcaster_id: &str,
        now: i64,
    ) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE broadcaster_leases SET last_heartbeat = MAX(last_heartbeat, ?3)
                 WHERE event_id = ?1 AND broadcaster_id = ?2",
                rusqlite::params![event_id, broadcaster_id, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::BroadcasterLeases, event_id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    pub fn get_lease(&self, event_id: &str) -> Result<Option<BroadcasterLease>, DbError> {
        self.with_conn(|conn| {
            let lease = conn
                .query_row(
                    "SELECT event_id, broadcaster_id, registered_at, last_heartbeat
                     FROM broadcaster_leases WHERE event_id = ?1",
                    [event_id],
                    lease_from_row,
                )
                .optional()?;
            Ok(lease)
        })
    }

    pub fn list_leases(&self) -> Result<Vec<BroadcasterLease>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, broadcaster_id, registered_at, last_heartbeat
                 FROM broadcaster_leases ORDER BY event_id",
            )?;
            let rows = stmt
                .query_map([], lease_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete the lease held by `broadcaster_id`. Returns whether a row was removed.
    pub fn delete_lease(&self, event_id: &str, broadcaster_id: &str) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM broadcaster_leases WHERE event_id = ?1 AND broadcaster_id = ?2",
                rusqlite::params![event_id, broadcaster_id],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::BroadcasterLeases, event_id, ChangeKind::Deleted);
        }
        Ok(changed)
    }

    /// Delete the lease only if its heartbeat is older than `cutoff`.
    ///
    /// A heartbeat that lands between the caller's staleness check and this
    /// statement makes the predicate fail, so the fresh lease survives.
    pub fn delete_lease_if_stale(&self, event_id: &str, cutoff: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM broadcaster_leases WHERE event_id = ?1 AND last_heartbeat < ?2",
                rusqlite::params![event_id, cutoff],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::BroadcasterLeases, event_id, ChangeKind::Deleted);
        }
        Ok(changed)
    }
}
