//! Change detection: two independent sources feeding one event channel.
//!
//! The push source subscribes to OS filesystem notifications and degrades
//! silently when they are unavailable or lossy. The pull source walks every
//! watched folder each poll interval and re-emits every path it sees,
//! previously seen or not. Neither source deduplicates; that is the settle
//! coordinator's and ledger's job.

use crate::config::WatchConfig;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

/// Which detection source produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// OS-level filesystem notification
    Push,
    /// Periodic directory scan
    Pull,
}

/// A raw candidate-path event. Transient; consumed by the settle coordinator
/// and discarded.
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
    pub source: EventSource,
}

impl CandidateEvent {
    pub fn now(path: PathBuf, source: EventSource) -> Self {
        Self {
            path,
            detected_at: Utc::now(),
            source,
        }
    }
}

/// Attach an OS notification watcher to every configured folder.
///
/// Returns `None` when notifications are unavailable; the caller keeps
/// running on the pull source alone. The returned watcher must be kept
/// alive for the duration of the run; dropping it stops the stream.
pub fn start_push_watcher(
    config: &WatchConfig,
    tx: mpsc::Sender<CandidateEvent>,
) -> Option<RecommendedWatcher> {
    if config.watched_folders.is_empty() {
        return None;
    }

    let include_hidden = config.include_hidden;
    let roots = config.watched_folders.clone();
    let handler = move |res: notify::Result<Event>| match res {
        Ok(event) => {
            // Creates, writes and renames all make a path a candidate.
            // Removals are uninteresting: a vanished path simply never settles.
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for path in event.paths {
                if !include_hidden && path_is_hidden(&path, &roots) {
                    continue;
                }
                // A full channel drops the event; the pull source re-discovers
                // the path within one poll interval.
                let _ = tx.try_send(CandidateEvent::now(path, EventSource::Push));
            }
        }
        Err(err) => warn!(error = %err, "Filesystem notification error"),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "Filesystem notifications unavailable, relying on polling");
            return None;
        }
    };

    let mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    let mut watching = 0usize;
    for folder in &config.watched_folders {
        match watcher.watch(folder, mode) {
            Ok(()) => watching += 1,
            Err(err) => {
                warn!(folder = %folder.display(), error = %err, "Cannot watch folder, relying on polling");
            }
        }
    }

    if watching == 0 {
        return None;
    }

    debug!(folders = watching, "Push watcher started");
    Some(watcher)
}

/// Spawn the polling source: every poll interval, list every watched folder
/// and emit a pull event for each regular file present.
///
/// This is the correctness backstop: it guarantees ledger convergence within
/// one poll interval plus one settle interval even if the push source misses
/// every event. The task exits when the event channel closes.
pub fn spawn_pull_source(
    config: Arc<WatchConfig>,
    store: stagehand_db::Store,
    tx: mpsc::Sender<CandidateEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let poll = config.poll_interval();
        loop {
            let snapshot = {
                let config = Arc::clone(&config);
                tokio::task::spawn_blocking(move || {
                    let mut paths = Vec::new();
                    for folder in &config.watched_folders {
                        paths.extend(walk_folder(
                            folder,
                            config.recursive,
                            config.follow_symlinks,
                            config.include_hidden,
                        ));
                    }
                    paths
                })
                .await
            };

            let paths = match snapshot {
                Ok(paths) => paths,
                Err(err) => {
                    error!(error = %err, "Directory scan task failed");
                    Vec::new()
                }
            };

            for path in paths {
                if tx
                    .send(CandidateEvent::now(path, EventSource::Pull))
                    .await
                    .is_err()
                {
                    // Receiver gone: the service is shutting down.
                    return;
                }
            }

            let now = Utc::now().timestamp_millis();
            if let Err(err) = store.set_meta("last_scan_at", &now.to_string()).await {
                warn!(error = %err, "Failed to record last scan time");
            }

            tokio::time::sleep(poll).await;
        }
    })
}

/// List the regular files under a watched folder. Missing folders yield an
/// empty listing rather than an error.
pub fn walk_folder(
    root: &Path,
    recursive: bool,
    follow_symlinks: bool,
    include_hidden: bool,
) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    let mut walker = WalkDir::new(root).follow_links(follow_symlinks);
    if !recursive {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_entry(move |entry| include_hidden || entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// True when any component of `path` below its watched root is hidden, so a
/// notification for `<root>/.cache/payload.txt` is filtered the same way the
/// pull source prunes the `.cache` subtree. Components of the root itself do
/// not count.
fn path_is_hidden(path: &Path, roots: &[PathBuf]) -> bool {
    let below_root = roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .unwrap_or(path);

    below_root.components().any(|component| match component {
        std::path::Component::Normal(name) => name
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn walk_skips_hidden_and_directories() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("visible.txt"), "x").unwrap();
        fs::write(temp.path().join(".hidden"), "x").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub").join("nested.txt"), "x").unwrap();

        let flat = walk_folder(temp.path(), false, false, false);
        assert_eq!(flat.len(), 1);
        assert!(flat[0].ends_with("visible.txt"));

        let recursive = walk_folder(temp.path(), true, false, false);
        assert_eq!(recursive.len(), 2);

        let with_hidden = walk_folder(temp.path(), false, false, true);
        assert_eq!(with_hidden.len(), 2);
    }

    #[test]
    fn walk_missing_folder_is_empty() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(walk_folder(&missing, true, false, false).is_empty());
    }

    #[test]
    fn hidden_components_below_the_root_count_as_hidden() {
        let roots = vec![PathBuf::from("/drop")];

        assert!(path_is_hidden(Path::new("/drop/.secret"), &roots));
        assert!(path_is_hidden(Path::new("/drop/.cache/payload.txt"), &roots));
        assert!(path_is_hidden(Path::new("/drop/sub/.hidden.txt"), &roots));
        assert!(!path_is_hidden(Path::new("/drop/sub/visible.txt"), &roots));

        // A dotted directory in the root itself is the user's choice of
        // watched folder, not a hidden drop.
        let dotted = vec![PathBuf::from("/home/u/.stagehand/drop")];
        assert!(!path_is_hidden(
            Path::new("/home/u/.stagehand/drop/a.txt"),
            &dotted
        ));
    }

    #[test]
    fn hidden_subtrees_are_pruned_recursively() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        fs::write(temp.path().join(".git").join("config"), "x").unwrap();
        fs::write(temp.path().join("data.csv"), "x").unwrap();

        let paths = walk_folder(temp.path(), true, false, false);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("data.csv"));
    }
}
