//! Intake service wiring: detector → settle coordinator → ingest.
//!
//! Each stage is an independent tokio task joined by bounded channels. The
//! ledger is the only serialization point; everything upstream may duplicate
//! or drop events freely because ingestion is idempotent.

use crate::config::WatchConfig;
use crate::detect::{self, CandidateEvent};
use crate::error::Result;
use crate::ledger::{ArrivalOutcome, Ledger};
use crate::settle::SettleCoordinator;
use chrono::Utc;
use notify::RecommendedWatcher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SETTLED_CHANNEL_CAPACITY: usize = 256;

/// The long-running watch pipeline.
///
/// Owns the push watcher (dropping it stops the notification stream), the
/// per-path settle timers, and the pull/route/ingest tasks.
pub struct IntakeService {
    _watcher: Option<RecommendedWatcher>,
    coordinator: Arc<SettleCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl IntakeService {
    /// Start the pipeline. Never fails outright: an unavailable notification
    /// subsystem degrades to polling alone.
    pub fn start(config: Arc<WatchConfig>, ledger: Ledger) -> Self {
        let (event_tx, mut event_rx) = mpsc::channel::<CandidateEvent>(EVENT_CHANNEL_CAPACITY);
        let (settled_tx, mut settled_rx) = mpsc::channel::<PathBuf>(SETTLED_CHANNEL_CAPACITY);

        let coordinator = Arc::new(SettleCoordinator::new(config.settle_interval(), settled_tx));

        let watcher = detect::start_push_watcher(&config, event_tx.clone());
        let pull_task =
            detect::spawn_pull_source(Arc::clone(&config), ledger.store().clone(), event_tx);

        let route_task = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move {
                while let Some(event) = event_rx.recv().await {
                    coordinator.observe(event).await;
                }
            }
        });

        let ingest_task = tokio::spawn({
            let ledger = ledger.clone();
            async move {
                while let Some(path) = settled_rx.recv().await {
                    match ledger.ingest_settled(&path).await {
                        Ok(Some(ArrivalOutcome::Created(id))) => {
                            debug!(id, path = %path.display(), "Ingested new record");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            // Storage failures are retried naturally by the
                            // next poll/settle cycle, not in a loop here.
                            error!(path = %path.display(), error = %err, "Ingest failed");
                        }
                    }
                }
            }
        });

        info!(
            folders = config.watched_folders.len(),
            poll_seconds = config.poll_seconds,
            settle_seconds = config.settle_seconds,
            push = watcher.is_some(),
            "Intake service started"
        );

        Self {
            _watcher: watcher,
            coordinator,
            tasks: vec![pull_task, route_task, ingest_task],
        }
    }

    /// Number of paths currently waiting to settle.
    pub fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    /// Graceful shutdown: stop the notification stream, abort the pipeline
    /// tasks and abandon in-flight settle timers. Abandoned timers never
    /// emit; the next run's pull source re-discovers their paths.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.coordinator.shutdown();
        info!("Intake service stopped");
    }
}

/// One-shot scan of every watched folder.
///
/// Uses mtime age as the stability check instead of live debounce timers: a
/// file counts as settled when it has not been modified for at least
/// `settle_seconds`. Returns the number of paths ingested (created, refreshed
/// or confirmed unchanged).
pub async fn scan_once(ledger: &Ledger, config: &WatchConfig) -> Result<usize> {
    let settle = config.settle_interval();
    let now = SystemTime::now();
    let mut processed = 0usize;

    for folder in &config.watched_folders {
        let paths = {
            let folder = folder.clone();
            let (recursive, follow, hidden) =
                (config.recursive, config.follow_symlinks, config.include_hidden);
            tokio::task::spawn_blocking(move || {
                detect::walk_folder(&folder, recursive, follow, hidden)
            })
            .await
            .unwrap_or_default()
        };

        for path in paths {
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if !is_settled_by_age(&metadata, now, settle) {
                debug!(path = %path.display(), "Too new, left for a later scan");
                continue;
            }
            if ledger.ingest_settled(&path).await?.is_some() {
                processed += 1;
            }
        }
    }

    let now_ms = Utc::now().timestamp_millis();
    ledger
        .store()
        .set_meta("last_scan_at", &now_ms.to_string())
        .await?;

    Ok(processed)
}

fn is_settled_by_age(metadata: &std::fs::Metadata, now: SystemTime, settle: Duration) -> bool {
    match metadata.modified() {
        Ok(mtime) => match now.duration_since(mtime) {
            Ok(age) => age >= settle,
            // mtime in the future: treat as still being written.
            Err(_) => false,
        },
        Err(_) => true,
    }
}
