//! Database schema definitions and migrations.

use rusqlite::Connection;

use crate::DbError;

pub fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(SCHEMA)?;
    migrate_legacy_tables(conn)?;
    Ok(())
}

fn migrate_legacy_tables(conn: &Connection) -> Result<(), DbError> {
    migrate_events_went_live_at(conn)?;
    migrate_presence_identity_columns(conn)?;
    Ok(())
}

/// events: databases created before stale-lease reaping lack went_live_at.
/// Backfill it from updated_at for rows that are already live.
fn migrate_events_went_live_at(conn: &Connection) -> Result<(), DbError> {
    if column_exists(conn, "events", "went_live_at")? {
        return Ok(());
    }
    tracing::info!("Adding went_live_at column to events");
    conn.execute_batch(
        "ALTER TABLE events ADD COLUMN went_live_at INTEGER;
         UPDATE events SET went_live_at = updated_at WHERE status = 'live';",
    )?;
    Ok(())
}

/// presence_records: user_id / device_key were added after identity_key.
fn migrate_presence_identity_columns(conn: &Connection) -> Result<(), DbError> {
    if !column_exists(conn, "presence_records", "user_id")? {
        tracing::info!("Adding user_id column to presence_records");
        conn.execute_batch("ALTER TABLE presence_records ADD COLUMN user_id TEXT;")?;
    }
    if !column_exists(conn, "presence_records", "device_key")? {
        tracing::info!("Adding device_key column to presence_records");
        conn.execute_batch("ALTER TABLE presence_records ADD COLUMN device_key TEXT;")?;
    }
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|name| name.as_deref() == Ok(column));
    Ok(exists)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    is_secret INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'scheduled'
        CHECK (status IN ('scheduled', 'live', 'ended')),
    start_time INTEGER NOT NULL,
    went_live_at INTEGER,
    viewer_count INTEGER NOT NULL DEFAULT 0,
    like_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);

CREATE TABLE IF NOT EXISTS broadcaster_leases (
    event_id TEXT PRIMARY KEY,
    broadcaster_id TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    last_heartbeat INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS presence_records (
    event_id TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    user_id TEXT,
    device_key TEXT,
    last_seen INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true,
    UNIQUE(event_id, identity_key)
);

CREATE INDEX IF NOT EXISTS idx_presence_event_active
    ON presence_records(event_id, is_active, last_seen);

CREATE TABLE IF NOT EXISTS event_peaks (
    event_id TEXT PRIMARY KEY,
    peak_viewers INTEGER NOT NULL DEFAULT 0,
    recorded_at INTEGER NOT NULL
);
"#;
