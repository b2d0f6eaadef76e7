//! File watching for incremental rebuilds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

/// Changes collected over one debounce window.
///
/// Paths are relative to the watched root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchBatch {
    /// Files created or modified
    pub changed: BTreeSet<PathBuf>,

    /// Files removed
    pub removed: BTreeSet<PathBuf>,
}

impl WatchBatch {
    /// Whether the batch holds no changes.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Every path in the batch.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.changed.iter().chain(self.removed.iter())
    }

    fn record(&mut self, change: Change) {
        match change {
            Change::Changed(path) => {
                self.removed.remove(&path);
                self.changed.insert(path);
            }
            Change::Removed(path) => {
                self.changed.remove(&path);
                self.removed.insert(path);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// File watcher for detecting source changes.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `paths` (relative to `root`) recursively.
    ///
    /// Events are merged until `debounce` passes without a new one, then
    /// delivered as a single [`WatchBatch`].
    pub fn new(
        root: &Path,
        paths: &[PathBuf],
        debounce: Duration,
    ) -> Result<(Self, async_mpsc::Receiver<WatchBatch>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(100);

        let root = root.canonicalize()?;

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            let path = root.join(path);
            if path.exists() {
                watcher
                    .watch(&path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
                tracing::debug!("Watching {}", path.display());
            } else {
                tracing::warn!("Not watching missing path {}", path.display());
            }
        }

        std::thread::spawn(move || {
            while let Ok(first) = sync_rx.recv() {
                let mut batch = WatchBatch::default();
                collect(&root, &first, &mut batch);

                // Keep merging until the window passes quietly.
                loop {
                    match sync_rx.recv_timeout(debounce) {
                        Ok(event) => collect(&root, &event, &mut batch),
                        Err(mpsc::RecvTimeoutError::Timeout) => break,
                        Err(mpsc::RecvTimeoutError::Disconnected) => return,
                    }
                }

                if batch.is_empty() {
                    continue;
                }
                if async_tx.blocking_send(batch).is_err() {
                    return;
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

fn collect(root: &Path, event: &notify::Event, batch: &mut WatchBatch) {
    for path in &event.paths {
        if let Some(change) = classify_event(root, path, &event.kind) {
            batch.record(change);
        }
    }
}

/// Classify a notify event for one path.
fn classify_event(root: &Path, path: &Path, kind: &EventKind) -> Option<Change> {
    let relative = path.strip_prefix(root).ok()?.to_path_buf();

    match kind {
        EventKind::Create(_) => Some(Change::Changed(relative)),
        EventKind::Remove(_) => Some(Change::Removed(relative)),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Change::Removed(relative)),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Change::Changed(relative)),
        EventKind::Modify(_) => {
            if path.exists() {
                Some(Change::Changed(relative))
            } else {
                Some(Change::Removed(relative))
            }
        }
        _ => None,
    }
}
