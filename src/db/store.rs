//! SQLite snapshot storage for datasets.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

use super::models::Record;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt data for target {target_id} observer {observer_id}: {reason}")]
    Corrupt {
        target_id: i64,
        observer_id: i64,
        reason: String,
    },
}

/// Thread-safe snapshot store. One row holds the full history of one pair.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// Load the stored history of a pair, or `None` if nothing was saved.
    pub fn load_records(
        &self,
        target_id: i64,
        observer_id: i64,
    ) -> Result<Option<Vec<Record>>, StoreError> {
        let row: Option<(i64, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT record_count, records FROM datasets WHERE target_id = ?1 AND observer_id = ?2",
                params![target_id, observer_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((record_count, json)) = row else {
            return Ok(None);
        };

        let records: Vec<Record> = serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            target_id,
            observer_id,
            reason: e.to_string(),
        })?;

        if records.len() as i64 != record_count {
            return Err(StoreError::Corrupt {
                target_id,
                observer_id,
                reason: format!(
                    "expected {} records, decoded {}",
                    record_count,
                    records.len()
                ),
            });
        }

        Ok(Some(records))
    }

    /// Replace the stored history of a pair.
    ///
    /// A single upsert, so an interrupted write leaves the previous row intact.
    pub fn save_records(
        &self,
        target_id: i64,
        observer_id: i64,
        records: &[Record],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(records)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO datasets (target_id, observer_id, record_count, records, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(target_id, observer_id) DO UPDATE SET
             record_count=excluded.record_count, records=excluded.records, saved_at=excluded.saved_at",
            params![
                target_id,
                observer_id,
                records.len() as i64,
                json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Number of stored pairs.
    pub fn pair_count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM datasets", [], |r| r.get(0))?)
    }

    #[cfg(test)]
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    #[cfg(test)]
    pub(crate) fn write_raw(
        &self,
        target_id: i64,
        observer_id: i64,
        record_count: i64,
        records: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO datasets (target_id, observer_id, record_count, records, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![target_id, observer_id, record_count, records, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
