//! Build summary written after each successful synchronization.

use super::write_atomic;
use crate::sync::{BuildMode, FileFailure, FullReason};
use crate::IndexerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Summary of one synchronization. Superseded, never merged, by the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub built_at: DateTime<Utc>,
    pub mode: BuildMode,
    /// Why a full rebuild happened, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_reason: Option<FullReason>,
    pub file_count: usize,
    pub node_count: usize,
    pub embed_fingerprint: String,
    pub source_fingerprint: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub added: usize,
    #[serde(default)]
    pub modified: usize,
    #[serde(default)]
    pub removed: usize,
    #[serde(default)]
    pub unchanged: usize,
    #[serde(default)]
    pub nodes_inserted: usize,
    #[serde(default)]
    pub nodes_deleted: usize,
    /// Files skipped this run
    #[serde(default)]
    pub skipped_count: usize,
    #[serde(default)]
    pub failures: Vec<FileFailure>,
}

/// Persists the manifest with the same atomic-replace discipline as the file map.
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, manifest: &Manifest) -> Result<(), IndexerError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.path, &json).await?;
        debug!(path = ?self.path, mode = ?manifest.mode, "Wrote manifest");
        Ok(())
    }

    /// Read the current manifest, if any.
    pub async fn read(&self) -> Result<Option<Manifest>, IndexerError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => {
                let manifest =
                    serde_json::from_slice(&data).map_err(|e| IndexerError::CorruptState {
                        path: self.path.clone(),
                        message: e.to_string(),
                    })?;
                Ok(Some(manifest))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
