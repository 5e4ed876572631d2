//! The staging ledger: the single authority over record state.
//!
//! All mutation flows through here. Detection feeds [`Ledger::ingest_settled`]
//! (idempotent upsert); the command surface issues transitions that are
//! checked against an explicit state-machine table and applied through the
//! store's conditional write, which linearizes concurrent requests.

use crate::error::{Result, StageError};
use crate::fingerprint::fingerprint_file;
use crate::mover;
use chrono::{DateTime, Utc};
use stagehand_db::{Actor, DbError, FileRecord, FileStatus, StatusCounts, Store, Transition};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Bound on a single fingerprint read, so unresponsive storage cannot wedge
/// the ingest loop.
const HASH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on a single archive move.
const MOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// User-issued transition commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Review,
    Archive,
    Reject,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Review => "review",
            Command::Archive => "archive",
            Command::Reject => "reject",
        }
    }

    pub const ALL: [Command; 3] = [Command::Review, Command::Archive, Command::Reject];
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table: `(status, command) -> next status`, or `None` when
/// the pair is illegal. Terminal states have no outgoing edges, which is what
/// makes transitions against archived/rejected records fail.
pub fn transition_target(status: FileStatus, command: Command) -> Option<FileStatus> {
    use Command::*;
    use FileStatus::*;

    match (status, command) {
        (New, Review) => Some(Reviewed),
        // Review may be skipped entirely.
        (New, Archive) | (Reviewed, Archive) => Some(Archived),
        (New, Reject) | (Reviewed, Reject) => Some(Rejected),
        _ => None,
    }
}

/// Outcome of an idempotent arrival upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// First settled detection of this identity
    Created(i64),
    /// Identity already live and nothing to do
    Unchanged(i64),
    /// Identity already live but the file moved; path refreshed
    PathUpdated(i64),
}

impl ArrivalOutcome {
    pub fn record_id(&self) -> i64 {
        match self {
            ArrivalOutcome::Created(id)
            | ArrivalOutcome::Unchanged(id)
            | ArrivalOutcome::PathUpdated(id) => *id,
        }
    }
}

/// Overall intake health: per-status counts plus the last pull-scan time.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub counts: StatusCounts,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// Handle to the staging ledger. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ========================================================================
    // Detection side (actor: system)
    // ========================================================================

    /// Ingest a settled path: fingerprint it and upsert the ledger.
    ///
    /// Idempotent under at-least-once detection: re-observing an unchanged
    /// live file is a no-op, a moved live file gets its path refreshed, and
    /// content matching a terminal record becomes a brand-new record.
    ///
    /// Returns `Ok(None)` when the event is dropped (path vanished between
    /// settlement and read, unreadable, or not a regular file).
    pub async fn ingest_settled(&self, path: &Path) -> Result<Option<ArrivalOutcome>> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Settled path vanished, dropping");
                return Ok(None);
            }
        };

        let size = metadata.len();
        let mtime_ms = mtime_millis(&metadata)?;
        let path_str = path.to_string_lossy().to_string();

        // Fast path: a live record already holds this exact observation, so
        // the content cannot have changed and re-hashing is wasted work.
        if let Some(id) = self.store.find_current(&path_str, size, mtime_ms).await? {
            return Ok(Some(ArrivalOutcome::Unchanged(id)));
        }

        let identity = {
            let owned = path.to_path_buf();
            let read = tokio::task::spawn_blocking(move || fingerprint_file(&owned));
            match tokio::time::timeout(HASH_TIMEOUT, read).await {
                Ok(Ok(Ok(identity))) => identity,
                Ok(Ok(Err(err))) => {
                    // Transient IO (vanished mid-read, permissions): drop the
                    // event; the next poll retries if the file is still there.
                    info!(path = %path.display(), error = %err, "Could not fingerprint, dropping event");
                    return Ok(None);
                }
                Ok(Err(join_err)) => {
                    return Err(StageError::InvalidState(format!(
                        "fingerprint task failed: {join_err}"
                    )));
                }
                Err(_) => {
                    warn!(path = %path.display(), "Fingerprint timed out, dropping event");
                    return Ok(None);
                }
            }
        };

        match self.store.get_live_by_identity(&identity).await? {
            Some(record) => {
                self.reconcile_existing(record, &path_str, mtime_ms)
                    .await
                    .map(Some)
            }
            None => match self
                .store
                .create_record(&identity, &path_str, &file_name(path), mtime_ms)
                .await
            {
                Ok(record) => {
                    info!(
                        id = record.id,
                        path = %path.display(),
                        size,
                        "New file staged"
                    );
                    Ok(Some(ArrivalOutcome::Created(record.id)))
                }
                Err(err) if err.is_unique_violation() => {
                    // Lost a create race for this identity; reconcile against
                    // the winner.
                    match self.store.get_live_by_identity(&identity).await? {
                        Some(record) => self
                            .reconcile_existing(record, &path_str, mtime_ms)
                            .await
                            .map(Some),
                        None => Ok(None),
                    }
                }
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Re-detection of an already-live identity: status and history stay
    /// untouched. The path is refreshed only when the recorded location is
    /// gone from disk (a real move, not a second copy).
    async fn reconcile_existing(
        &self,
        record: FileRecord,
        path_str: &str,
        mtime_ms: i64,
    ) -> Result<ArrivalOutcome> {
        if record.path == path_str {
            if record.mtime_ms != mtime_ms {
                self.store.refresh_mtime(record.id, mtime_ms).await?;
            }
            return Ok(ArrivalOutcome::Unchanged(record.id));
        }

        if Path::new(&record.path).exists() {
            // Duplicate content at a second path while the original is still
            // present; the record keeps pointing at the original.
            return Ok(ArrivalOutcome::Unchanged(record.id));
        }

        self.store.update_path(record.id, path_str).await?;
        self.store.refresh_mtime(record.id, mtime_ms).await?;
        info!(id = record.id, from = %record.path, to = %path_str, "Tracked file moved");
        Ok(ArrivalOutcome::PathUpdated(record.id))
    }

    // ========================================================================
    // Command side (actor: user)
    // ========================================================================

    /// Mark a record reviewed.
    pub async fn review(&self, id: i64) -> Result<FileRecord> {
        self.transition(id, Command::Review).await
    }

    /// Mark a record rejected. The file stays where it is.
    pub async fn reject(&self, id: i64) -> Result<FileRecord> {
        self.transition(id, Command::Reject).await
    }

    /// Archive a record: durably record the `archived` status, then move the
    /// file into `archive_folder` under a collision-safe name.
    ///
    /// If the move fails the transition is rolled back, so the ledger never
    /// claims `archived` while the file still sits in the watched folder.
    /// A source that already vanished archives the record without a move.
    pub async fn archive(&self, id: i64, archive_folder: &Path) -> Result<FileRecord> {
        let record = self.get(id).await?;
        let Some(target) = transition_target(record.status, Command::Archive) else {
            return Err(StageError::NotEligible {
                id,
                status: record.status,
                command: Command::Archive,
            });
        };

        let applied = self
            .apply(id, record.status, target, Command::Archive)
            .await?;

        let src = PathBuf::from(&record.path);
        if !src.exists() {
            warn!(id, path = %record.path, "Source already gone, archiving record only");
            return self.get(id).await;
        }

        let moved = {
            let dest_dir = archive_folder.to_path_buf();
            let task = tokio::task::spawn_blocking(move || mover::move_into(&src, &dest_dir));
            match tokio::time::timeout(MOVE_TIMEOUT, task).await {
                Ok(Ok(result)) => result.map_err(|e| e.to_string()),
                Ok(Err(join_err)) => Err(format!("move task failed: {join_err}")),
                Err(_) => Err("move timed out".to_string()),
            }
        };

        match moved {
            Ok(dest) => {
                self.store
                    .update_path(id, &dest.to_string_lossy())
                    .await?;
                info!(id, dest = %dest.display(), "File archived");
                self.get(id).await
            }
            Err(message) => {
                self.store.revert_transition(&applied).await?;
                warn!(id, error = %message, "Archive move failed, transition rolled back");
                Err(StageError::Archive(message))
            }
        }
    }

    /// Rename the file on disk (same directory) and update the record's path.
    /// Not a status transition; identity and history are untouched.
    pub async fn rename(&self, id: i64, new_name: &str) -> Result<FileRecord> {
        if new_name.is_empty()
            || new_name == "."
            || new_name == ".."
            || new_name.contains(['/', '\\'])
        {
            return Err(StageError::InvalidState(format!(
                "'{new_name}' is not a bare file name"
            )));
        }

        let record = self.get(id).await?;
        let src = PathBuf::from(&record.path);
        let dest = src.with_file_name(new_name);

        if src.exists() {
            tokio::fs::rename(&src, &dest).await?;
        }
        self.store
            .update_path(id, &dest.to_string_lossy())
            .await?;

        self.get(id).await
    }

    /// Merge tags into a record.
    pub async fn tag(&self, id: i64, tags: &[String]) -> Result<FileRecord> {
        self.store.add_tags(id, tags).await.map_err(map_missing(id))?;
        self.get(id).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, id: i64) -> Result<FileRecord> {
        self.store
            .get_record(id)
            .await?
            .ok_or(StageError::NotFound(id))
    }

    pub async fn history(&self, id: i64) -> Result<Vec<Transition>> {
        // Surface unknown ids the same way the other operations do.
        self.get(id).await?;
        Ok(self.store.history(id).await?)
    }

    pub async fn list(&self, status: Option<FileStatus>, limit: i64) -> Result<Vec<FileRecord>> {
        Ok(self.store.list_records(status, limit).await?)
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let counts = self.store.counts_by_status().await?;
        let last_scan_at = self
            .store
            .get_meta("last_scan_at")
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(HealthReport {
            counts,
            last_scan_at,
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn transition(&self, id: i64, command: Command) -> Result<FileRecord> {
        let record = self.get(id).await?;
        let Some(target) = transition_target(record.status, command) else {
            return Err(StageError::NotEligible {
                id,
                status: record.status,
                command,
            });
        };

        self.apply(id, record.status, target, command).await?;
        self.get(id).await
    }

    async fn apply(
        &self,
        id: i64,
        from: FileStatus,
        to: FileStatus,
        command: Command,
    ) -> Result<stagehand_db::AppliedTransition> {
        match self.store.apply_transition(id, from, to, Actor::User).await {
            Ok(applied) => Ok(applied),
            // A concurrent transition won; report against the fresh status.
            Err(DbError::StaleState(_)) => {
                let current = self.get(id).await?;
                Err(StageError::NotEligible {
                    id,
                    status: current.status,
                    command,
                })
            }
            Err(DbError::NotFound(_)) => Err(StageError::NotFound(id)),
            Err(err) => Err(err.into()),
        }
    }
}

fn map_missing(id: i64) -> impl FnOnce(DbError) -> StageError {
    move |err| match err {
        DbError::NotFound(_) => StageError::NotFound(id),
        other => other.into(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn mtime_millis(metadata: &std::fs::Metadata) -> Result<i64> {
    let mtime = metadata.modified()?;
    let since_epoch = mtime
        .duration_since(UNIX_EPOCH)
        .map_err(|e| StageError::InvalidState(format!("mtime before epoch: {e}")))?;
    Ok(since_epoch.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The five legal (status, command) pairs from the transition table.
    /// Everything else across the full grid must be rejected.
    #[test]
    fn transition_table_is_exactly_the_specified_edges() {
        let legal = [
            (FileStatus::New, Command::Review, FileStatus::Reviewed),
            (FileStatus::New, Command::Archive, FileStatus::Archived),
            (FileStatus::New, Command::Reject, FileStatus::Rejected),
            (FileStatus::Reviewed, Command::Archive, FileStatus::Archived),
            (FileStatus::Reviewed, Command::Reject, FileStatus::Rejected),
        ];

        for status in FileStatus::ALL {
            for command in Command::ALL {
                let expected = legal
                    .iter()
                    .find(|(s, c, _)| *s == status && *c == command)
                    .map(|(_, _, next)| *next);
                assert_eq!(
                    transition_target(status, command),
                    expected,
                    "({status}, {command})"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for status in [FileStatus::Archived, FileStatus::Rejected] {
            for command in Command::ALL {
                assert_eq!(transition_target(status, command), None);
            }
        }
    }
}
