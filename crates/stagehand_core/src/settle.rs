//! Settle coordination: per-path debounce timers.
//!
//! Files are often written incrementally (copy-in-progress, archive
//! extraction); fingerprinting mid-write yields a wrong or unstable identity.
//! A path is declared settled only after a full quiet interval during which
//! its size and mtime stayed stable across the final two observations.
//!
//! Each in-flight path owns an independent timer task, so settlement of one
//! path never blocks detection or settlement of another. Duplicate events
//! that observe an unchanged size/mtime do NOT reset the timer: the pull
//! source re-emits every path every cycle, and resetting on those would keep
//! a stable file unsettled forever whenever `poll_seconds <= settle_seconds`.

use crate::detect::CandidateEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Size/mtime snapshot used for stability comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PathStat {
    size: u64,
    mtime: SystemTime,
}

struct PathEntry {
    observed: PathStat,
    timer: JoinHandle<()>,
}

/// Registry of per-path debounce timers. Emits each settled path exactly once
/// per quiet period on the channel handed to [`SettleCoordinator::new`].
pub struct SettleCoordinator {
    settle: Duration,
    entries: Arc<Mutex<HashMap<PathBuf, PathEntry>>>,
    settled_tx: mpsc::Sender<PathBuf>,
}

impl SettleCoordinator {
    pub fn new(settle: Duration, settled_tx: mpsc::Sender<PathBuf>) -> Self {
        Self {
            settle,
            entries: Arc::new(Mutex::new(HashMap::new())),
            settled_tx,
        }
    }

    /// Feed one candidate event into the registry.
    ///
    /// Stats the path; a vanished or non-file path clears any in-flight timer
    /// with no record created (removed mid-copy is expected, not an error).
    pub async fn observe(&self, event: CandidateEvent) {
        let path = event.path;

        let stat = match stat_path(&path).await {
            Some(stat) => stat,
            None => {
                let mut entries = lock_entries(&self.entries);
                if let Some(entry) = entries.remove(&path) {
                    entry.timer.abort();
                    trace!(path = %path.display(), "Candidate vanished before settling");
                }
                return;
            }
        };

        {
            let mut entries = lock_entries(&self.entries);
            if let Some(entry) = entries.get(&path) {
                if entry.observed == stat {
                    // Duplicate observation of an unchanged file; the running
                    // timer keeps its deadline.
                    return;
                }
            }
            if let Some(stale) = entries.remove(&path) {
                stale.timer.abort();
            }
            let timer = self.spawn_timer(path.clone(), stat);
            entries.insert(path, PathEntry {
                observed: stat,
                timer,
            });
        }
    }

    /// Number of paths currently waiting to settle.
    pub fn in_flight(&self) -> usize {
        lock_entries(&self.entries).len()
    }

    /// Abort every in-flight timer. Abandoned timers never emit; the pull
    /// source re-discovers their paths on the next cycle or process restart.
    pub fn shutdown(&self) {
        let mut entries = lock_entries(&self.entries);
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
    }

    fn spawn_timer(&self, path: PathBuf, stat: PathStat) -> JoinHandle<()> {
        let settle = self.settle;
        let entries = Arc::clone(&self.entries);
        let settled_tx = self.settled_tx.clone();

        tokio::spawn(async move {
            let mut expected = stat;
            loop {
                tokio::time::sleep(settle).await;

                match stat_path(&path).await {
                    None => {
                        lock_entries(&entries).remove(&path);
                        debug!(path = %path.display(), "Path vanished before settling, dropped");
                        return;
                    }
                    Some(current) if current == expected => {
                        lock_entries(&entries).remove(&path);
                        trace!(path = %path.display(), size = current.size, "Path settled");
                        let _ = settled_tx.send(path).await;
                        return;
                    }
                    Some(current) => {
                        // Still being written: restart the quiet period. A
                        // path that never stabilizes never settles.
                        expected = current;
                        if let Some(entry) = lock_entries(&entries).get_mut(&path) {
                            entry.observed = current;
                        }
                    }
                }
            }
        })
    }
}

fn lock_entries(
    entries: &Arc<Mutex<HashMap<PathBuf, PathEntry>>>,
) -> std::sync::MutexGuard<'_, HashMap<PathBuf, PathEntry>> {
    // Timer tasks only hold the lock for map edits, never across an await,
    // so poisoning can only come from a panicking map edit.
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn stat_path(path: &Path) -> Option<PathStat> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    Some(PathStat {
        size: metadata.len(),
        mtime: metadata.modified().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::EventSource;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const SETTLE: Duration = Duration::from_millis(150);

    fn event(path: &Path) -> CandidateEvent {
        CandidateEvent::now(path.to_path_buf(), EventSource::Pull)
    }

    #[tokio::test]
    async fn stable_file_settles_exactly_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "stable").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = SettleCoordinator::new(SETTLE, tx);

        // Duplicate events must not reset the quiet period or double-emit.
        coordinator.observe(event(&path)).await;
        coordinator.observe(event(&path)).await;

        let settled = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("settle in time")
            .unwrap();
        assert_eq!(settled, path);
        assert_eq!(coordinator.in_flight(), 0);

        tokio::time::sleep(SETTLE * 2).await;
        assert!(rx.try_recv().is_err(), "settled more than once");
    }

    #[tokio::test]
    async fn growing_file_does_not_settle_until_quiescent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        fs::write(&path, "chunk-0").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = SettleCoordinator::new(SETTLE, tx);
        coordinator.observe(event(&path)).await;

        // Keep appending at intervals shorter than the settle window.
        for i in 1..=4 {
            tokio::time::sleep(SETTLE / 3).await;
            let mut content = fs::read(&path).unwrap();
            content.extend_from_slice(format!("chunk-{i}").as_bytes());
            fs::write(&path, content).unwrap();
            coordinator.observe(event(&path)).await;
            assert!(rx.try_recv().is_err(), "settled mid-write");
        }

        // Writes stopped; one settle notification after the quiet period.
        let settled = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("settle after final chunk")
            .unwrap();
        assert_eq!(settled, path);
    }

    #[tokio::test]
    async fn continuously_touched_path_never_settles() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.log");
        fs::write(&path, "0").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = SettleCoordinator::new(SETTLE, tx);
        coordinator.observe(event(&path)).await;

        // Grow the file for ~6 settle windows without ever going quiet.
        for i in 0..12 {
            tokio::time::sleep(SETTLE / 2).await;
            let mut content = fs::read(&path).unwrap();
            content.push(b'0' + (i % 10));
            fs::write(&path, content).unwrap();
            coordinator.observe(event(&path)).await;
        }

        assert!(
            rx.try_recv().is_err(),
            "a never-stable path must never be ingested"
        );
        assert_eq!(coordinator.in_flight(), 1);
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn vanished_path_is_dropped_without_emitting() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ghost.txt");
        fs::write(&path, "here then gone").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = SettleCoordinator::new(SETTLE, tx);
        coordinator.observe(event(&path)).await;

        fs::remove_file(&path).unwrap();

        tokio::time::sleep(SETTLE * 3).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn paths_settle_independently() {
        let temp = TempDir::new().unwrap();
        let quiet = temp.path().join("quiet.txt");
        let busy = temp.path().join("busy.txt");
        fs::write(&quiet, "done").unwrap();
        fs::write(&busy, "0").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let coordinator = SettleCoordinator::new(SETTLE, tx);
        coordinator.observe(event(&quiet)).await;
        coordinator.observe(event(&busy)).await;

        // Churn the busy file; the quiet one must still settle on time.
        for i in 0..6 {
            tokio::time::sleep(SETTLE / 2).await;
            let mut content = fs::read(&busy).unwrap();
            content.push(b'0' + i);
            fs::write(&busy, content).unwrap();
            coordinator.observe(event(&busy)).await;
        }

        let settled = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("quiet path settles despite busy sibling")
            .unwrap();
        assert_eq!(settled, quiet);
        coordinator.shutdown();
    }
}
