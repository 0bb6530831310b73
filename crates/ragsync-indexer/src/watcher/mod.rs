//! File system watching for watch mode.
//!
//! [`FileWatcher`] turns native file events (FSEvents on macOS, inotify on
//! Linux) into [`FileChange`]s for paths the scanner would pick up. The
//! [`WatchLoop`] debounces those into synchronization runs.

mod debounce;
mod watch_loop;

pub use debounce::{DebounceAction, DebounceState, WatchDebouncer};
pub use watch_loop::{SyncRunner, WatchEvent, WatchHandle, WatchLoop, WatchStats};

use crate::scanner::{relative_path, ScanFilter};
use crate::IndexerError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// File change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A file system change event.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path to the changed file
    pub path: PathBuf,
    /// Kind of change
    pub kind: ChangeKind,
}

/// Options for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// How long native events settle before they are reported. Independent of
    /// the synchronization debounce, which is the watch loop's concern.
    pub settle: Duration,
    /// Whether to watch recursively
    pub recursive: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(200),
            recursive: true,
        }
    }
}

/// Decides which changed paths are relevant to the index.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    root: PathBuf,
    filter: ScanFilter,
    exclude: Vec<PathBuf>,
}

impl WatchFilter {
    pub fn new(root: PathBuf, filter: ScanFilter, exclude: Vec<PathBuf>) -> Self {
        Self {
            root,
            filter,
            exclude,
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) {
            return false;
        }
        if self.exclude.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }

        let rel = relative_path(&self.root, path);
        if rel.is_empty() || rel.split('/').any(|part| part.starts_with('.')) {
            return false;
        }

        self.filter.accepts_path(&rel)
    }
}

/// File system watcher with debouncing.
pub struct FileWatcher {
    options: WatcherOptions,
    tx: mpsc::Sender<FileChange>,
    rx: mpsc::Receiver<FileChange>,
    _debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
}

impl FileWatcher {
    pub fn new(options: WatcherOptions) -> Self {
        let (tx, rx) = mpsc::channel(1000);
        Self {
            options,
            tx,
            rx,
            _debouncer: None,
        }
    }

    /// Start watching `filter`'s root.
    pub fn watch(&mut self, filter: WatchFilter) -> Result<(), IndexerError> {
        let root = filter
            .root
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(filter.root.clone()))?;
        let filter = WatchFilter { root: root.clone(), ..filter };

        let tx = self.tx.clone();

        let mut debouncer = new_debouncer(
            self.options.settle,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        let Some(change) = convert_event(&event.event) else {
                            continue;
                        };
                        if !filter.accepts(&change.path) {
                            continue;
                        }
                        if let Err(e) = tx.blocking_send(change) {
                            error!(error = %e, "Failed to send change event");
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "Watcher error");
                    }
                }
            },
        )
        .map_err(|e| IndexerError::Watcher(e.to_string()))?;

        let mode = if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        debouncer
            .watch(&root, mode)
            .map_err(|e: notify::Error| IndexerError::Watcher(e.to_string()))?;

        info!(path = ?root, recursive = self.options.recursive, "Started watching");

        self._debouncer = Some(debouncer);

        Ok(())
    }

    /// Receive the next change event.
    pub async fn next(&mut self) -> Option<FileChange> {
        self.rx.recv().await
    }

    /// Feed every change into a watch loop until either side stops.
    pub async fn forward(mut self, handle: WatchHandle) {
        while let Some(change) = self.next().await {
            if handle.notify(change.path).await.is_err() {
                break;
            }
        }
    }
}

/// Convert a notify Event to our FileChange.
fn convert_event(event: &Event) -> Option<FileChange> {
    let path = event.paths.first()?.clone();

    if path.is_dir() {
        return None;
    }

    let kind = match &event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        EventKind::Any | EventKind::Access(_) | EventKind::Other => return None,
    };

    debug!(path = ?path, kind = ?kind, "File change detected");

    Some(FileChange { path, kind })
}
