//! Error types for the intake engine.

use crate::ledger::Command;
use stagehand_db::FileStatus;
use std::io;
use thiserror::Error;

/// Engine error type.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Ledger store error: {0}")]
    Store(#[from] stagehand_db::DbError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Record {id} is not eligible for '{command}' (status: {status})")]
    NotEligible {
        id: i64,
        status: FileStatus,
        command: Command,
    },

    #[error("Archive move failed: {0}")]
    Archive(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StageError>;
