//! Persistence of processed ids, exposes, user settings and executions.
//!
//! The hunt pipeline only talks to the [`Storage`] trait. [`SqliteStorage`] is
//! the local embedded backend; a hosted document store can implement the same
//! trait.

use crate::config::FilterConfig;
use crate::error::StorageError;
use crate::filter::Filter;
use crate::models::{Expose, StoredExpose};
use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub type StorageResult<T> = Result<T, StorageError>;

/// Rows read per lock acquisition while scanning for recent exposes.
const RECENT_SCAN_PAGE: i64 = 100;

/// Per-user settings, keyed by the user's chat id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub filters: Option<FilterConfig>,
    #[serde(default)]
    pub mute: bool,
}

pub trait Storage: Send + Sync {
    fn is_processed(&self, expose_id: i64) -> StorageResult<bool>;

    fn mark_processed(&self, expose_id: i64) -> StorageResult<()>;

    /// Marks the id processed and reports whether it was unseen before.
    ///
    /// The default composes [`Storage::is_processed`] and
    /// [`Storage::mark_processed`] and is therefore not atomic: two concurrent
    /// hunts may both see the same id as new. Backends that can do better
    /// override it.
    fn mark_if_unseen(&self, expose_id: i64) -> StorageResult<bool> {
        if self.is_processed(expose_id)? {
            return Ok(false);
        }
        self.mark_processed(expose_id)?;
        Ok(true)
    }

    /// Upserts the expose by id and stamps it with the current time.
    fn save_expose(&self, expose: &Expose) -> StorageResult<()>;

    /// Exposes saved at or after `since`, most recent first.
    fn get_exposes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<StoredExpose>>;

    /// Up to `count` exposes, most recent first, that pass `filter` if one is given.
    fn get_recent_exposes(
        &self,
        count: usize,
        filter: Option<&Filter<'_>>,
    ) -> AnyResult<Vec<StoredExpose>>;

    fn get_settings_for_user(&self, user_id: i64) -> StorageResult<Option<UserSettings>>;

    fn save_settings_for_user(&self, user_id: i64, settings: &UserSettings) -> StorageResult<()>;

    fn get_user_settings(&self) -> StorageResult<Vec<(i64, UserSettings)>>;

    fn get_last_run_time(&self) -> StorageResult<Option<DateTime<Utc>>>;

    /// Appends "now" to the execution log and returns it.
    fn update_last_run_time(&self) -> StorageResult<DateTime<Utc>>;
}

/// SQLite backend. A single connection guarded by a mutex.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS processed (
                id INTEGER PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS exposes (
                id INTEGER PRIMARY KEY,
                created_at INTEGER NOT NULL,
                record TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exposes_created_at ON exposes(created_at);
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                settings TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS executions (
                timestamp INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// All processed ids in ascending order.
    pub fn processed_ids(&self) -> StorageResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM processed ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        debug!(count = ids.len(), "Already processed");
        Ok(ids)
    }

    /// The next page of exposes ordered strictly below the `(created_at, id)` cursor.
    fn recent_page(&self, cursor: (i64, i64)) -> StorageResult<Vec<StoredExpose>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT created_at, record FROM exposes
             WHERE created_at < ?1 OR (created_at = ?1 AND id < ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![cursor.0, cursor.1, RECENT_SCAN_PAGE], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(created_at, record)| stored_expose(created_at, &record))
            .collect()
    }
}

fn timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(StorageError::InvalidTimestamp(millis))
}

fn stored_expose(created_at: i64, record: &str) -> StorageResult<StoredExpose> {
    Ok(StoredExpose {
        expose: serde_json::from_str(record)?,
        created_at: timestamp(created_at)?,
    })
}

impl Storage for SqliteStorage {
    fn is_processed(&self, expose_id: i64) -> StorageResult<bool> {
        debug!(expose_id, "is_processed");
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT 1 FROM processed WHERE id = ?1")?;
        Ok(stmt.exists(params![expose_id])?)
    }

    fn mark_processed(&self, expose_id: i64) -> StorageResult<()> {
        debug!(expose_id, "mark_processed");
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO processed (id) VALUES (?1)",
            params![expose_id],
        )?;
        Ok(())
    }

    /// One statement under the connection lock, so concurrent hunts sharing
    /// this storage cannot both claim the same id.
    fn mark_if_unseen(&self, expose_id: i64) -> StorageResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO processed (id) VALUES (?1)",
            params![expose_id],
        )?;
        debug!(expose_id, new = inserted == 1, "mark_if_unseen");
        Ok(inserted == 1)
    }

    fn save_expose(&self, expose: &Expose) -> StorageResult<()> {
        let record = serde_json::to_string(expose)?;
        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO exposes (id, created_at, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE
             SET created_at = excluded.created_at, record = excluded.record",
            params![expose.id, now, record],
        )?;
        Ok(())
    }

    fn get_exposes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<StoredExpose>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT created_at, record FROM exposes
             WHERE created_at >= ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![since.timestamp_millis()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(created_at, record)| stored_expose(created_at, &record))
            .collect()
    }

    fn get_recent_exposes(
        &self,
        count: usize,
        filter: Option<&Filter<'_>>,
    ) -> AnyResult<Vec<StoredExpose>> {
        let mut result = Vec::new();
        let mut cursor = (i64::MAX, i64::MAX);
        // The filter may call back into storage, so it runs without the lock
        // held. Paging by key keeps rows saved meanwhile from shifting the scan.
        while result.len() < count {
            let page = self.recent_page(cursor)?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = (last.created_at.timestamp_millis(), last.expose.id);
            for stored in page {
                let keep = match filter {
                    Some(filter) => filter.is_interesting_expose(&stored.expose)?,
                    None => true,
                };
                if keep {
                    result.push(stored);
                    if result.len() == count {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    fn get_settings_for_user(&self, user_id: i64) -> StorageResult<Option<UserSettings>> {
        let conn = self.lock()?;
        let settings: Option<String> = conn
            .query_row(
                "SELECT settings FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        settings
            .map(|s| serde_json::from_str(&s).map_err(StorageError::from))
            .transpose()
    }

    fn save_settings_for_user(&self, user_id: i64, settings: &UserSettings) -> StorageResult<()> {
        let settings = serde_json::to_string(settings)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, settings) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET settings = excluded.settings",
            params![user_id, settings],
        )?;
        Ok(())
    }

    fn get_user_settings(&self) -> StorageResult<Vec<(i64, UserSettings)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, settings FROM users ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, settings)| -> StorageResult<(i64, UserSettings)> {
                Ok((id, serde_json::from_str(&settings)?))
            })
            .collect()
    }

    fn get_last_run_time(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let last: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp) FROM executions",
            [],
            |row| row.get(0),
        )?;
        last.map(timestamp).transpose()
    }

    fn update_last_run_time(&self) -> StorageResult<DateTime<Utc>> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO executions (timestamp) VALUES (?1)",
            params![now.timestamp_millis()],
        )?;
        Ok(now)
    }
}
