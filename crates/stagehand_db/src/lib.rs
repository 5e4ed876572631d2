//! Staging ledger persistence for Stagehand.
//!
//! This crate is the single writer of staged-file truth. All state lives in
//! one SQLite database:
//! - `staged_files`: one row per content identity, with current path and status
//! - `staged_file_history`: append-only transition log
//! - `intake_meta`: key/value scratch (last scan time, schema version)
//!
//! Every invariant-bearing operation runs inside an explicit transaction.
//! In particular [`Store::apply_transition`] is a conditional write: it only
//! succeeds if the record still holds the expected prior status, which is what
//! linearizes concurrent transition requests against the same record.

mod error;
mod records;
mod types;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Schema. Timestamps are INTEGER Unix milliseconds throughout.
///
/// The partial unique index enforces the ledger's core invariant: at most one
/// live (non-terminal) record per content identity. Terminal rows are kept
/// forever and do not participate in the index, so re-arrival of archived
/// content can create a fresh record.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS staged_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    path TEXT NOT NULL,
    original_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new'
        CHECK (status IN ('new','reviewed','archived','rejected')),
    tags TEXT NOT NULL DEFAULT '[]',
    mtime INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    last_transition_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_staged_files_live_identity
    ON staged_files(content_hash, size)
    WHERE status IN ('new','reviewed');

CREATE INDEX IF NOT EXISTS idx_staged_files_status
    ON staged_files(status, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_staged_files_path
    ON staged_files(path);

CREATE TABLE IF NOT EXISTS staged_file_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES staged_files(id),
    from_status TEXT
        CHECK (from_status IS NULL OR from_status IN ('new','reviewed','archived','rejected')),
    to_status TEXT NOT NULL
        CHECK (to_status IN ('new','reviewed','archived','rejected')),
    actor TEXT NOT NULL CHECK (actor IN ('system','user')),
    at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_staged_file_history_record
    ON staged_file_history(record_id, at);

CREATE TABLE IF NOT EXISTS intake_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// The staging ledger store.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open or create a ledger database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        info!(path = %path.display(), "Ledger database opened");

        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        // WAL is sticky per database file; setting it on every open is a no-op
        // after the first.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current time as Unix milliseconds.
    pub(crate) fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Set a meta key (e.g. `last_scan_at`).
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO intake_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read a meta key.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        use sqlx::Row;
        let row = sqlx::query("SELECT value FROM intake_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }
}
