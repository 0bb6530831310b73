//! Parallel file system walker with gitignore support.
//!
//! Files accepted by the caller's predicate are hashed on the walker threads,
//! so the digest work is spread across the same pool as directory traversal.

use crate::hasher::hash_bytes;
use crate::IndexerError;
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

/// A discovered file entry.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Canonical source-relative path (`/` separated)
    pub rel_path: String,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the content, `None` if the file could not be read
    pub hash: Option<String>,
}

/// File system walker that respects .gitignore rules.
pub struct Walker {
    root: PathBuf,
    follow_symlinks: bool,
    respect_gitignore: bool,
    threads: usize,
    exclude: Vec<PathBuf>,
}

impl Walker {
    /// Create a new walker for the given root directory.
    pub fn new(root: &Path, follow_symlinks: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            follow_symlinks,
            respect_gitignore: true,
            threads: 0,
            exclude: Vec::new(),
        }
    }

    /// Toggle `.gitignore` handling.
    pub fn respect_gitignore(mut self, yes: bool) -> Self {
        self.respect_gitignore = yes;
        self
    }

    /// Number of walker threads (0 lets `ignore` choose).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Directories that are never descended into.
    pub fn exclude(mut self, dirs: Vec<PathBuf>) -> Self {
        self.exclude = dirs;
        self
    }

    /// Walk the tree, keeping files for which `accept(rel_path, size)` holds.
    ///
    /// Results are sorted by relative path.
    pub fn walk<F>(&self, accept: F) -> Result<Vec<FileEntry>, IndexerError>
    where
        F: Fn(&str, u64) -> bool + Sync,
    {
        let (tx, rx) = mpsc::channel();
        let exclude = self.exclude.clone();

        let walker = WalkBuilder::new(&self.root)
            .follow_links(self.follow_symlinks)
            .hidden(true)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .ignore(self.respect_gitignore)
            .parents(self.respect_gitignore)
            .threads(self.threads)
            .filter_entry(move |entry| !exclude.iter().any(|dir| entry.path().starts_with(dir)))
            .build_parallel();

        let root = self.root.as_path();
        let accept = &accept;

        walker.run(|| {
            let tx = tx.clone();
            Box::new(move |result| {
                match result {
                    Ok(entry) => {
                        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                            return WalkState::Continue;
                        }
                        let Ok(metadata) = entry.metadata() else {
                            return WalkState::Continue;
                        };
                        let rel_path = relative_path(root, entry.path());
                        if !accept(&rel_path, metadata.len()) {
                            return WalkState::Continue;
                        }

                        let hash = match std::fs::read(entry.path()) {
                            Ok(bytes) => Some(hash_bytes(&bytes)),
                            Err(e) => {
                                debug!(path = ?entry.path(), error = %e, "Failed to read file");
                                None
                            }
                        };

                        let _ = tx.send(FileEntry {
                            path: entry.path().to_path_buf(),
                            rel_path,
                            size: metadata.len(),
                            hash,
                        });
                    }
                    Err(e) => {
                        debug!(error = %e, "Walk error");
                    }
                }
                WalkState::Continue
            })
        });

        drop(tx);

        let mut entries: Vec<FileEntry> = rx.into_iter().collect();
        entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

        Ok(entries)
    }
}

/// Source-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
