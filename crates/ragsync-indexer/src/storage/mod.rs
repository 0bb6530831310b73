//! Persistence layer for an index location.
//!
//! Every file written here goes through [`write_atomic`]: the bytes land in a
//! process-unique temporary sibling, are fsynced, and are then renamed over
//! the target, so readers only ever see the previous or the new version.

mod filemap;
mod manifest;
mod node_store;

pub use filemap::{FileMap, FileMapStore, FileRecord, StoredMap, FILEMAP_VERSION};
pub use manifest::{Manifest, ManifestWriter};
pub use node_store::FileNodeStore;

use crate::IndexerError;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const FILEMAP_FILE: &str = "filemap.json";
const MANIFEST_FILE: &str = "manifest.json";
const NODES_FILE: &str = "nodes.msgpack";
const SOURCE_DIR: &str = "source";

/// Handle to one persisted index location.
///
/// All synchronizer operations take this explicitly instead of resolving a
/// shared default location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    dir: PathBuf,
}

impl IndexLocation {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filemap_path(&self) -> PathBuf {
        self.dir.join(FILEMAP_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.dir.join(NODES_FILE)
    }

    /// Where a remote source is materialized.
    pub fn source_snapshot_dir(&self) -> PathBuf {
        self.dir.join(SOURCE_DIR)
    }

    /// Ensure the directory exists.
    pub async fn ensure(&self) -> Result<(), IndexerError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }
}

/// Name of this process's temporary sibling for a file called `name`.
pub fn temp_file_name(name: &str) -> String {
    format!(".{}.{}.tmp", name, std::process::id())
}

/// Temporary sibling used by [`write_atomic`] for `path`.
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(temp_file_name(&name))
}

/// Atomic write: write to temp file, fsync, then rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), IndexerError> {
    let persistence = |e: std::io::Error| IndexerError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persistence)?;
    }

    let temp_path = temp_path_for(path);
    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(persistence(e));
    }

    debug!(path = ?path, size = data.len(), "Wrote file atomically");

    Ok(())
}
