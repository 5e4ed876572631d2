//! Core types for the staging ledger.
//!
//! A staged file is identified by its content, not its path: the
//! `(blake3 hash, size)` pair names the bytes wherever they sit. The path
//! column only records where the content currently lives.

use serde::{Deserialize, Serialize};

/// Content identity of a staged file: blake3 hash plus byte size.
///
/// Immutable once assigned to a record. Two paths holding identical bytes
/// share one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Hex-encoded blake3 hash of the file contents
    pub hash: String,
    /// File size in bytes
    pub size: u64,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hash, self.size)
    }
}

/// Status of a staged file.
///
/// `New` is the only initial state. `Archived` and `Rejected` are terminal:
/// a record that reaches either never leaves it, and a later arrival of the
/// same content creates a fresh record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Detected and fingerprinted, awaiting review
    New,
    /// Looked at by a human, awaiting archive/reject
    Reviewed,
    /// Moved to the archive folder (terminal)
    Archived,
    /// Explicitly declined (terminal, file stays put)
    Rejected,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::New => "new",
            FileStatus::Reviewed => "reviewed",
            FileStatus::Archived => "archived",
            FileStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(FileStatus::New),
            "reviewed" => Some(FileStatus::Reviewed),
            "archived" => Some(FileStatus::Archived),
            "rejected" => Some(FileStatus::Rejected),
            _ => None,
        }
    }

    /// A live record is one that has not reached a terminal status.
    pub fn is_live(&self) -> bool {
        matches!(self, FileStatus::New | FileStatus::Reviewed)
    }

    pub const ALL: [FileStatus; 4] = [
        FileStatus::New,
        FileStatus::Reviewed,
        FileStatus::Archived,
        FileStatus::Rejected,
    ];
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who requested a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// Automatic (detection pipeline)
    System,
    /// Explicit command (CLI/API)
    User,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::System => "system",
            Actor::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Actor::System),
            "user" => Some(Actor::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staged file record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub identity: Identity,
    /// Current location on disk
    pub path: String,
    /// Filename at first detection (kept through renames for display)
    pub original_name: String,
    pub status: FileStatus,
    /// Sorted, deduplicated user tags
    pub tags: Vec<String>,
    /// mtime of the file at last observation, Unix milliseconds
    pub mtime_ms: i64,
    /// When the record was created, Unix milliseconds
    pub created_at: i64,
    /// When the status last changed, Unix milliseconds
    pub last_transition_at: i64,
}

/// One entry in a record's transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: i64,
    pub record_id: i64,
    /// `None` for the record-creation entry
    pub from: Option<FileStatus>,
    pub to: FileStatus,
    pub actor: Actor,
    /// Unix milliseconds
    pub at: i64,
}

/// Handle to a committed transition, used to roll it back if its side effect
/// (the physical archive move) fails.
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub record_id: i64,
    pub history_id: i64,
    pub from: FileStatus,
    pub to: FileStatus,
}

/// Per-status record counts for the health query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub new: u64,
    pub reviewed: u64,
    pub archived: u64,
    pub rejected: u64,
}

impl StatusCounts {
    pub fn get(&self, status: FileStatus) -> u64 {
        match status {
            FileStatus::New => self.new,
            FileStatus::Reviewed => self.reviewed,
            FileStatus::Archived => self.archived,
            FileStatus::Rejected => self.rejected,
        }
    }

    pub fn total(&self) -> u64 {
        self.new + self.reviewed + self.archived + self.rejected
    }
}
