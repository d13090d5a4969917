//! Live event rows and their status transitions.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::changes::{ChangeKind, Table};
use crate::{Database, DbError, require_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Scheduled,
    Live,
    Ended,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            other => Err(DbError::InvalidData(format!("unknown event status: {other}"))),
        }
    }
}

impl FromSql for EventStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: DbError| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for EventStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A live session that tickets are sold for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub status: EventStatus,
    pub start_time: i64,
    /// When the event last transitioned to `live`.
    pub went_live_at: Option<i64>,
    /// Cached distinct-viewer count. Presence records are the ground truth.
    pub viewer_count: i64,
    pub like_count: i64,
    pub updated_at: i64,
}

impl Event {
    pub fn is_live(&self) -> bool {
        self.status == EventStatus::Live
    }
}

const EVENT_COLUMNS: &str =
    "id, status, start_time, went_live_at, viewer_count, like_count, updated_at";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        status: row.get(1)?,
        start_time: row.get(2)?,
        went_live_at: row.get(3)?,
        viewer_count: row.get(4)?,
        like_count: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl Database {
    /// Insert a new event in the `scheduled` state.
    pub fn create_event(&self, id: &str, start_time: i64, now: i64) -> Result<Event, DbError> {
        require_id("event_id", id)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, status, start_time, viewer_count, like_count, updated_at)
                 VALUES (?1, 'scheduled', ?2, 0, 0, ?3)",
                rusqlite::params![id, start_time, now],
            )?;
            Ok(())
        })?;
        self.notify(Table::Events, id, ChangeKind::Inserted);
        Ok(Event {
            id: id.to_string(),
            status: EventStatus::Scheduled,
            start_time,
            went_live_at: None,
            viewer_count: 0,
            like_count: 0,
            updated_at: now,
        })
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>, DbError> {
        self.with_conn(|conn| {
            let event = conn
                .query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                    [id],
                    event_from_row,
                )
                .optional()?;
            Ok(event)
        })
    }

    pub fn list_events_by_status(&self, status: EventStatus) -> Result<Vec<Event>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE status = ?1 ORDER BY start_time"
            ))?;
            let rows = stmt
                .query_map([status], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Transition `scheduled -> live`. Returns `false` when the event was not
    /// in the `scheduled` state (already live, ended, or missing).
    pub fn mark_event_live(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET status = 'live', went_live_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND status = 'scheduled'",
                rusqlite::params![id, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    /// Transition any non-ended event to `ended`. Ending an ended event is a
    /// no-op and returns `false`.
    pub fn mark_event_ended(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET status = 'ended', updated_at = ?2
                 WHERE id = ?1 AND status != 'ended'",
                rusqlite::params![id, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    /// Overwrite the cached viewer counter unconditionally.
    pub fn set_viewer_count(&self, id: &str, count: i64, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET viewer_count = ?2, updated_at = ?3
                 WHERE id = ?1 AND viewer_count != ?2",
                rusqlite::params![id, count.max(0), now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    /// Raise the cached viewer counter to `count` only if it is currently
    /// lower. A concurrent pass that already wrote a higher value wins.
    pub fn raise_viewer_count(&self, id: &str, count: i64, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET viewer_count = ?2, updated_at = ?3
                 WHERE id = ?1 AND viewer_count < ?2",
                rusqlite::params![id, count, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    /// Compare-and-set: write `count` only if the counter still reads
    /// `expected`. Used for downward corrections so a concurrent join is not
    /// overwritten.
    pub fn replace_viewer_count(
        &self,
        id: &str,
        expected: i64,
        count: i64,
        now: i64,
    ) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET viewer_count = ?3, updated_at = ?4
                 WHERE id = ?1 AND viewer_count = ?2 AND viewer_count != ?3",
                rusqlite::params![id, expected, count.max(0), now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    pub fn increment_viewer_count(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET viewer_count = viewer_count + 1, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    /// Decrement the cached viewer counter, never below zero.
    pub fn decrement_viewer_count(&self, id: &str, now: i64) -> Result<bool, DbError> {
        let changed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE events SET viewer_count = viewer_count - 1, updated_at = ?2
                 WHERE id = ?1 AND viewer_count > 0",
                rusqlite::params![id, now],
            )?;
            Ok(n > 0)
        })?;
        if changed {
            self.notify(Table::Events, id, ChangeKind::Updated);
        }
        Ok(changed)
    }

    pub fn increment_like_count(&self, id: &str, now: i64) -> Result<i64, DbError> {
        let likes = self.with_conn(|conn| {
            let likes = conn
                .query_row(
                    "UPDATE events SET like_count = like_count + 1, updated_at = ?2
                     WHERE id = ?1 RETURNING like_count",
                    rusqlite::params![id, now],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            likes.ok_or_else(|| DbError::NotFound(format!("event {id}")))
        })?;
        self.notify(Table::Events, id, ChangeKind::Updated);
        Ok(likes)
    }
}
