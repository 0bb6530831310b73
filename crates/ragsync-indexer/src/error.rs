//! Indexer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during synchronization.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The source could not be reached or materialized; nothing was mutated
    #[error("Source unreachable ({fingerprint}): {message}")]
    SourceUnreachable { fingerprint: String, message: String },

    /// Persisted state exists but cannot be parsed
    #[error("Corrupt state in {path}: {message}")]
    CorruptState { path: PathBuf, message: String },

    /// Writing the file map, manifest or node store failed
    #[error("Persistence failure for {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// The splitter rejected a file
    #[error("Split error in {path}: {message}")]
    Split { path: String, message: String },

    /// Index storage rejected an insert/delete
    #[error("Index storage error: {0}")]
    Index(String),

    /// Source descriptor is malformed
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// `git` invocation failed
    #[error("git failed: {0}")]
    Git(String),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Path not found
    #[error("Path not found: {0}")]
    NotFound(PathBuf),
}

impl IndexerError {
    /// Whether the error aborts the whole run (as opposed to a single file).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IndexerError::Split { .. } | IndexerError::Index(_))
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexerError::Serialization(e.to_string())
    }
}
