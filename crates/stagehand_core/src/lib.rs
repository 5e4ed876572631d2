//! Stagehand core - file intake and staging engine
//!
//! Stagehand stages files dropped into watched folders: it detects their
//! arrival, waits until they are fully written, assigns them a durable
//! content identity, and tracks them through a review workflow until they
//! are archived or rejected.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │   Detector   │     │    Settle    │     │ Fingerprinter │     │    Ledger    │
//! │ (push + pull)│────▶│  Coordinator │────▶│ (blake3+size) │────▶│   (SQLite)   │
//! │              │     │  (debounce)  │     │               │     │              │
//! └──────────────┘     └──────────────┘     └───────────────┘     └──────────────┘
//! ```
//!
//! # Core concepts
//!
//! - **CandidateEvent**: a raw "something happened at this path" signal, from
//!   OS notifications (push) or the periodic directory scan (pull)
//! - **Settle**: a path is safe to ingest only after a quiet interval with a
//!   stable size/mtime
//! - **Identity**: `(blake3 hash, size)` naming content regardless of path
//! - **Ledger**: the single writer of staged-file truth; all transitions are
//!   linearized through its conditional writes
//!
//! The pull source is the correctness backstop: even if OS notifications miss
//! every event, the ledger converges within one poll interval plus one settle
//! interval.

pub mod config;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod mover;
pub mod service;
pub mod settle;

// Re-exports for convenience
pub use config::WatchConfig;
pub use detect::{CandidateEvent, EventSource};
pub use error::{Result, StageError};
pub use fingerprint::fingerprint_file;
pub use ledger::{transition_target, ArrivalOutcome, Command, HealthReport, Ledger};
pub use service::{scan_once, IntakeService};
pub use settle::SettleCoordinator;

// The persisted model lives in the store crate; surface it here so most
// consumers only need stagehand_core.
pub use stagehand_db::{
    Actor, FileRecord, FileStatus, Identity, StatusCounts, Store, Transition,
};
