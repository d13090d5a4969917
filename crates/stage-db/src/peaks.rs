//! Peak concurrent viewers per event.

use rusqlite::OptionalExtension;

use crate::{Database, DbError};

impl Database {
    /// Highest viewer count recorded for the event, or 0.
    pub fn get_peak_viewers(&self, event_id: &str) -> Result<i64, DbError> {
        self.with_conn(|conn| {
            let peak = conn
                .query_row(
                    "SELECT peak_viewers FROM event_peaks WHERE event_id = ?1",
                    [event_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(peak.unwrap_or(0))
        })
    }

    /// Record `count` as the new peak if it exceeds the stored one.
    /// The stored peak never decreases.
    pub fn raise_peak_viewers(&self, event_id: &str, count: i64, now: i64) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO event_peaks (event_id, peak_viewers, recorded_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(event_id) DO UPDATE SET
                    peak_viewers = excluded.peak_viewers,
                    recorded_at = excluded.recorded_at
                 WHERE excluded.peak_viewers > event_peaks.peak_viewers",
                rusqlite::params![event_id, count.max(0), now],
            )?;
            Ok(n > 0)
        })
    }
}
