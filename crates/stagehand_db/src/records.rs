//! Record operations: arrival upserts, status transitions, history.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::Store;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Store {
    // ========================================================================
    // Arrival / lookup
    // ========================================================================

    /// Create a record for a newly detected identity with status `new` and
    /// its creation history entry, as one transaction.
    ///
    /// Fails with a unique violation if a live record for this identity
    /// already exists; callers treat that as "lost the race" and re-read.
    pub async fn create_record(
        &self,
        identity: &Identity,
        path: &str,
        original_name: &str,
        mtime_ms: i64,
    ) -> Result<FileRecord> {
        let now = Self::now_millis();
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO staged_files
                (content_hash, size, path, original_name, status, tags, mtime, created_at, last_transition_at)
            VALUES (?, ?, ?, ?, 'new', '[]', ?, ?, ?)
            "#,
        )
        .bind(&identity.hash)
        .bind(identity.size as i64)
        .bind(path)
        .bind(original_name)
        .bind(mtime_ms)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO staged_file_history (record_id, from_status, to_status, actor, at)
            VALUES (?, NULL, 'new', 'system', ?)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_record(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("record {id} vanished after insert")))
    }

    /// Get a record by id.
    pub async fn get_record(&self, id: i64) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT * FROM staged_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Get the live (non-terminal) record for an identity, if any.
    pub async fn get_live_by_identity(&self, identity: &Identity) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM staged_files
            WHERE content_hash = ? AND size = ? AND status IN ('new','reviewed')
            "#,
        )
        .bind(&identity.hash)
        .bind(identity.size as i64)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Fast-path lookup for the ingest stage: the id of the live record that
    /// already holds this exact path with unchanged size and mtime, if any.
    /// A hit means the file does not need to be re-hashed.
    pub async fn find_current(&self, path: &str, size: u64, mtime_ms: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM staged_files
            WHERE path = ? AND size = ? AND mtime = ? AND status IN ('new','reviewed')
            "#,
        )
        .bind(path)
        .bind(size as i64)
        .bind(mtime_ms)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Record a fresh observation of an unchanged file (mtime moved without a
    /// content change, e.g. `touch`). Keeps the fast path warm.
    pub async fn refresh_mtime(&self, id: i64, mtime_ms: i64) -> Result<()> {
        sqlx::query("UPDATE staged_files SET mtime = ? WHERE id = ?")
            .bind(mtime_ms)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Point a record at a new on-disk location. Identity, status and history
    /// are untouched; this is the rename/move case.
    pub async fn update_path(&self, id: i64, new_path: &str) -> Result<()> {
        let result = sqlx::query("UPDATE staged_files SET path = ? WHERE id = ?")
            .bind(new_path)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("record {id}")));
        }
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Atomically move a record from `from` to `to` and append the matching
    /// history entry.
    ///
    /// The status update is conditional on the record still holding `from`;
    /// of two concurrent requests against the same prior state, exactly one
    /// commits and the other observes [`DbError::StaleState`]. No observer
    /// ever sees the status change without its history entry.
    pub async fn apply_transition(
        &self,
        id: i64,
        from: FileStatus,
        to: FileStatus,
        actor: Actor,
    ) -> Result<AppliedTransition> {
        let now = Self::now_millis();
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE staged_files SET status = ?, last_transition_at = ? WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let current = sqlx::query("SELECT status FROM staged_files WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
            return Err(match current {
                Some(row) => DbError::stale_state(format!(
                    "record {id} is '{}', expected '{from}'",
                    row.get::<String, _>("status"),
                )),
                None => DbError::not_found(format!("record {id}")),
            });
        }

        let history = sqlx::query(
            r#"
            INSERT INTO staged_file_history (record_id, from_status, to_status, actor, at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(actor.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AppliedTransition {
            record_id: id,
            history_id: history.last_insert_rowid(),
            from,
            to,
        })
    }

    /// Undo a committed transition whose side effect failed: restore the
    /// prior status and remove that transition's history entry, atomically.
    pub async fn revert_transition(&self, applied: &AppliedTransition) -> Result<()> {
        let now = Self::now_millis();
        let mut tx = self.pool().begin().await?;

        let restored = sqlx::query(
            "UPDATE staged_files SET status = ?, last_transition_at = ? WHERE id = ? AND status = ?",
        )
        .bind(applied.from.as_str())
        .bind(now)
        .bind(applied.record_id)
        .bind(applied.to.as_str())
        .execute(&mut *tx)
        .await?;

        if restored.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::stale_state(format!(
                "record {} no longer holds '{}', cannot revert",
                applied.record_id, applied.to
            )));
        }

        sqlx::query("DELETE FROM staged_file_history WHERE id = ?")
            .bind(applied.history_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Ordered transition history for a record.
    pub async fn history(&self, id: i64) -> Result<Vec<Transition>> {
        let rows = sqlx::query(
            "SELECT * FROM staged_file_history WHERE record_id = ? ORDER BY at ASC, id ASC",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_transition).collect()
    }

    // ========================================================================
    // Tags / listing / counts
    // ========================================================================

    /// Merge tags into a record's tag set. Returns the merged, sorted set.
    pub async fn add_tags(&self, id: i64, tags: &[String]) -> Result<Vec<String>> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT tags FROM staged_files WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("record {id}")))?;

        let mut merged: Vec<String> = serde_json::from_str(&row.get::<String, _>("tags"))?;
        for tag in tags {
            let tag = tag.trim();
            if !tag.is_empty() && !merged.iter().any(|t| t == tag) {
                merged.push(tag.to_string());
            }
        }
        merged.sort();

        sqlx::query("UPDATE staged_files SET tags = ? WHERE id = ?")
            .bind(serde_json::to_string(&merged)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(merged)
    }

    /// List records, newest first, optionally filtered by status.
    pub async fn list_records(
        &self,
        status: Option<FileStatus>,
        limit: i64,
    ) -> Result<Vec<FileRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM staged_files WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM staged_files ORDER BY created_at DESC, id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }

    /// Record counts per status.
    pub async fn counts_by_status(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS c FROM staged_files GROUP BY status")
            .fetch_all(self.pool())
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let count = row.get::<i64, _>("c") as u64;
            match FileStatus::parse(&status) {
                Some(FileStatus::New) => counts.new = count,
                Some(FileStatus::Reviewed) => counts.reviewed = count,
                Some(FileStatus::Archived) => counts.archived = count,
                Some(FileStatus::Rejected) => counts.rejected = count,
                None => return Err(DbError::Corrupt(format!("unknown status '{status}'"))),
            }
        }
        Ok(counts)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<FileRecord> {
    let status: String = row.get("status");
    let status = FileStatus::parse(&status)
        .ok_or_else(|| DbError::Corrupt(format!("unknown status '{status}'")))?;
    let tags: Vec<String> = serde_json::from_str(&row.get::<String, _>("tags"))?;

    Ok(FileRecord {
        id: row.get("id"),
        identity: Identity {
            hash: row.get("content_hash"),
            size: row.get::<i64, _>("size") as u64,
        },
        path: row.get("path"),
        original_name: row.get("original_name"),
        status,
        tags,
        mtime_ms: row.get("mtime"),
        created_at: row.get("created_at"),
        last_transition_at: row.get("last_transition_at"),
    })
}

fn row_to_transition(row: &SqliteRow) -> Result<Transition> {
    let from: Option<String> = row.get("from_status");
    let from = match from {
        Some(s) => Some(
            FileStatus::parse(&s)
                .ok_or_else(|| DbError::Corrupt(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let to: String = row.get("to_status");
    let to = FileStatus::parse(&to)
        .ok_or_else(|| DbError::Corrupt(format!("unknown status '{to}'")))?;
    let actor: String = row.get("actor");
    let actor =
        Actor::parse(&actor).ok_or_else(|| DbError::Corrupt(format!("unknown actor '{actor}'")))?;

    Ok(Transition {
        id: row.get("id"),
        record_id: row.get("record_id"),
        from,
        to,
        actor,
        at: row.get("at"),
    })
}
