//! SQLite stamp database.
//!
//! Persists the path→mtime mapping across process invocations.
//!
//! Schema:
//! - `db_meta`: schema version row, auto-clears stamps on mismatch
//! - `file_stamps`: path TEXT PRIMARY KEY, mtime_ns INTEGER
//!
//! Failures are fatal to the caller; this layer performs no retries.

use crate::stamp::FileStamp;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current schema version.
///
/// Increment when the stamp representation changes (timestamp width, key
/// normalization rules); a mismatched database is cleared on open rather
/// than serving stamps recorded under different rules.
const SCHEMA_VERSION: i32 = 1;

/// Name of the database file inside the cache directory.
const DB_FILE: &str = "stamps.db";

/// SQLite-backed store for file stamps.
pub struct StampDb {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl StampDb {
    /// Creates or opens the stamp database under `cache_dir`.
    pub fn open(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", cache_dir.display())
        })?;

        let db_path = cache_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open stamp database: {}", db_path.display()))?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS db_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_stamps (
                path TEXT PRIMARY KEY,
                mtime_ns INTEGER NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        let stored_version: Option<i32> = conn
            .query_row(
                "SELECT value FROM db_meta WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query schema version")?;

        match stored_version {
            Some(v) if v != SCHEMA_VERSION => {
                warn!(
                    stored = v,
                    current = SCHEMA_VERSION,
                    "Schema version mismatch, clearing persisted stamps"
                );

                conn.execute("DELETE FROM file_stamps", [])
                    .context("Failed to clear stale stamps")?;

                conn.execute(
                    "INSERT OR REPLACE INTO db_meta (key, value) VALUES ('version', ?)",
                    params![SCHEMA_VERSION],
                )
                .context("Failed to update schema version")?;
            }
            None => {
                conn.execute(
                    "INSERT INTO db_meta (key, value) VALUES ('version', ?)",
                    params![SCHEMA_VERSION],
                )
                .context("Failed to initialize schema version")?;
            }
            Some(_) => {}
        }

        debug!(path = %db_path.display(), "Stamp database opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Default database directory: `<platform cache dir>/freshtrack`.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("freshtrack"))
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Loads the full path→stamp mapping.
    pub fn load_all(&self) -> Result<HashMap<PathBuf, FileStamp>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT path, mtime_ns FROM file_stamps")
            .context("Failed to prepare stamp query")?;

        let rows = stmt
            .query_map([], |row| {
                let path: String = row.get(0)?;
                let nanos: i64 = row.get(1)?;
                Ok((PathBuf::from(path), FileStamp::from_nanos(nanos)))
            })
            .context("Failed to query stamps")?;

        let mut stamps = HashMap::new();
        for row in rows {
            let (path, stamp) = row.context("Failed to read stamp row")?;
            stamps.insert(path, stamp);
        }

        debug!(count = stamps.len(), "Stamps loaded");
        Ok(stamps)
    }

    /// Replaces every persisted stamp with `stamps`, in one transaction.
    pub fn save_all(&self, stamps: &HashMap<PathBuf, FileStamp>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .context("Failed to begin stamp transaction")?;

        tx.execute("DELETE FROM file_stamps", [])
            .context("Failed to clear previous stamps")?;

        {
            let mut stmt = tx
                .prepare("INSERT INTO file_stamps (path, mtime_ns) VALUES (?, ?)")
                .context("Failed to prepare stamp insert")?;
            for (path, stamp) in stamps {
                let path_str = path.to_string_lossy();
                stmt.execute(params![path_str.as_ref(), stamp.as_nanos()])
                    .context("Failed to insert stamp")?;
            }
        }

        tx.commit().context("Failed to commit stamps")?;
        debug!(count = stamps.len(), "Stamps saved");
        Ok(())
    }

    /// Deletes every persisted stamp immediately.
    pub fn clear(&self) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM file_stamps", [])
            .context("Failed to clear stamps")?;
        debug!("Stamp database cleared");
        Ok(())
    }

    /// Number of persisted stamp rows.
    pub fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM file_stamps", [], |row| row.get(0))
            .context("Failed to count stamps")?;
        Ok(count as usize)
    }
}
