//! Viewer presence records: evidence that an identity was recently watching.

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError, require_id};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub event_id: String,
    pub identity_key: String,
    pub user_id: Option<String>,
    pub device_key: Option<String>,
    pub last_seen: i64,
    pub is_active: bool,
}

const PRESENCE_COLUMNS: &str = "event_id, identity_key, user_id, device_key, last_seen, is_active";

fn presence_from_row(row: &Row<'_>) -> rusqlite::Result<PresenceRecord> {
    Ok(PresenceRecord {
        event_id: row.get(0)?,
        identity_key: row.get(1)?,
        user_id: row.get(2)?,
        device_key: row.get(3)?,
        last_seen: row.get(4)?,
        is_active: row.get(5)?,
    })
}

impl Database {
    /// Create or reactivate the presence record for `(event_id, identity_key)`.
    ///
    /// Returns `true` when the identity was not already active, i.e. this is
    /// an arrival rather than a repeated join.
    pub fn upsert_presence(
        &self,
        event_id: &str,
        identity_key: &str,
        user_id: Option<&str>,
        device_key: Option<&str>,
        now: i64,
    ) -> Result<bool, DbError> {
        require_id("event_id", event_id)?;
        require_id("identity_key", identity_key)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let was_active = tx
                .query_row(
                    "SELECT is_active FROM presence_records
                     WHERE event_id = ?1 AND identity_key = ?2",
                    rusqlite::params![event_id, identity_key],
                    |row| row.get::<_, bool>(0),
                )
                .optional()?
                .unwrap_or(false);
            tx.execute(
                "INSERT INTO presence_records
                    (event_id, identity_key, user_id, device_key, last_seen, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, true)
                 ON CONFLICT(event_id, identity_key) DO UPDATE SET
                    user_id = COALESCE(excluded.user_id, presence_records.user_id),
                    device_key = COALESCE(excluded.device_key, presence_records.device_key),
                    last_seen = MAX(presence_records.last_seen, excluded.last_seen),
                    is_active = true",
                rusqlite::params![event_id, identity_key, user_id, device_key, now],
            )?;
            tx.commit()?;
            Ok(!was_active)
        })
    }

    /// Liveness ping. Returns `false` if the record is missing or inactive,
    /// in which case the caller should join again.
    pub fn touch_presence(
        &self,
        event_id: &str,
        identity_key: &str,
        now: i64,
    ) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE presence_records SET last_seen = MAX(last_seen, ?3)
                 WHERE event_id = ?1 AND identity_key = ?2 AND is_active = true",
                rusqlite::params![event_id, identity_key, now],
            )?;
            Ok(n > 0)
        })
    }

    /// Mark a record inactive. Returns `true` only for the call that
    /// actually flipped it, so callers can decrement counters exactly once.
    pub fn deactivate_presence(
        &self,
        event_id: &str,
        identity_key: &str,
        now: i64,
    ) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE presence_records SET is_active = false, last_seen = MAX(last_seen, ?3)
                 WHERE event_id = ?1 AND identity_key = ?2 AND is_active = true",
                rusqlite::params![event_id, identity_key, now],
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_presence(
        &self,
        event_id: &str,
        identity_key: &str,
    ) -> Result<Option<PresenceRecord>, DbError> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    &format!(
                        "SELECT {PRESENCE_COLUMNS} FROM presence_records
                         WHERE event_id = ?1 AND identity_key = ?2"
                    ),
                    rusqlite::params![event_id, identity_key],
                    presence_from_row,
                )
                .optional()?;
            Ok(record)
        })
    }

    /// All records for the event still flagged active, regardless of age.
    pub fn active_presence(&self, event_id: &str) -> Result<Vec<PresenceRecord>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PRESENCE_COLUMNS} FROM presence_records
                 WHERE event_id = ?1 AND is_active = true
                 ORDER BY identity_key"
            ))?;
            let rows = stmt
                .query_map([event_id], presence_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete records for the event that were last seen before `cutoff`.
    /// Returns the number of rows removed.
    pub fn prune_presence(&self, event_id: &str, cutoff: i64) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM presence_records WHERE event_id = ?1 AND last_seen < ?2",
                rusqlite::params![event_id, cutoff],
            )?;
            Ok(n)
        })
    }
}
