//! Durable half of the server configuration: one row per setting key.

use std::collections::HashMap;

use rusqlite::OptionalExtension;

use crate::{Database, DbError, require_id, unix_now};

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    /// Insert or overwrite. `secret` marks values that must be masked when
    /// displayed.
    pub fn set_setting(&self, key: &str, value: &str, secret: bool) -> Result<(), DbError> {
        require_id("key", key)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, is_secret, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     is_secret = excluded.is_secret,
                     updated_at = excluded.updated_at",
                rusqlite::params![key, value, secret, unix_now()],
            )?;
            Ok(())
        })
    }

    pub fn get_all_settings(&self) -> Result<HashMap<String, String>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let settings = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<HashMap<String, String>, _>>()?;
            Ok(settings)
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_setting(&self, key: &str) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }
}
