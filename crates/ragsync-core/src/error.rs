//! Core error types for ragsync.

use ragsync_indexer::IndexerError;
use thiserror::Error;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Profile or embedding spec is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Neither a local path nor a repository was configured
    #[error("No source configured: set `path` or `repo`")]
    NoSource,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Synchronizer error
    #[error(transparent)]
    Indexer(#[from] IndexerError),
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}
