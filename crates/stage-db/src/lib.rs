//! SQLite store for live events, broadcaster leases and viewer presence.
//!
//! Every mutation is a single-row conditional statement, so concurrent
//! writers (a live heartbeat and a reaper sweep, two reconciliation passes)
//! converge instead of conflicting. Writes to `events` and
//! `broadcaster_leases` are published on a change feed that callers can
//! subscribe to instead of polling.

pub mod changes;
pub mod events;
pub mod leases;
pub mod peaks;
pub mod presence;
pub mod schema;
pub mod settings;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::broadcast;

pub use changes::{ChangeKind, RowChange, RowChangeFilter, Table};
pub use events::{Event, EventStatus};
pub use leases::BroadcasterLease;
pub use presence::PresenceRecord;

const CHANGE_CHANNEL_CAPACITY: usize = 512;

/// Thread-safe database handle wrapping a single SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<RowChange>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    /// Access the underlying connection with a closure.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&Connection) -> Result<R, DbError>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    /// Access the underlying connection mutably (for transactions).
    pub fn with_conn_mut<F, R>(&self, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<R, DbError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Subscribe to row-level change notifications.
    ///
    /// Receivers only see changes committed after they subscribed. A lagging
    /// receiver loses the oldest notifications, so consumers should re-read
    /// the row they care about rather than trust the notification payload.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, table: Table, row_id: &str, kind: ChangeKind) {
        // No receivers is the normal case for the headless server.
        let _ = self.changes.send(RowChange {
            table,
            row_id: row_id.to_string(),
            kind,
        });
    }

    fn configure(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA busy_timeout=5000;
                 PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
    }

    fn migrate(&self) -> Result<(), DbError> {
        self.with_conn(|conn| {
            schema::run_migrations(conn)?;
            Ok(())
        })
    }
}

/// Database error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Current wall-clock time as unix seconds. Store functions take `now`
/// explicitly; callers at the edges use this.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Injectable source of "now" in unix seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(unix_now)
}

pub(crate) fn require_id(field: &str, value: &str) -> Result<(), DbError> {
    if value.trim().is_empty() {
        return Err(DbError::InvalidData(format!("{field} must not be empty")));
    }
    Ok(())
}
