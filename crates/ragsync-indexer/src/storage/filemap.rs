//! Durable path -> record mapping.

use super::write_atomic;
use crate::index::NodeId;
use crate::IndexerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current on-disk format version.
pub const FILEMAP_VERSION: u32 = 1;

/// What the index knows about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Canonical source-relative path
    pub path: String,
    /// SHA-256 of the indexed content
    pub content_hash: String,
    /// Nodes produced for this content, in chunk order
    pub node_ids: Vec<NodeId>,
    /// File size in bytes
    pub size: u64,
    /// When this content was indexed
    pub last_seen_at: DateTime<Utc>,
}

/// Persisted synchronizer state for one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMap {
    /// Format version
    pub version: u32,
    /// Which source the map was built from
    pub source_fingerprint: String,
    /// Which embedding backend/model/dimension the nodes were built with
    pub embed_fingerprint: String,
    /// Records keyed by path
    pub files: BTreeMap<String, FileRecord>,
}

impl FileMap {
    /// Create an empty map for the given fingerprints.
    pub fn new(source_fingerprint: &str, embed_fingerprint: &str) -> Self {
        Self {
            version: FILEMAP_VERSION,
            source_fingerprint: source_fingerprint.to_string(),
            embed_fingerprint: embed_fingerprint.to_string(),
            files: BTreeMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.path.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total number of referenced nodes.
    pub fn node_count(&self) -> usize {
        self.files.values().map(|r| r.node_ids.len()).sum()
    }

    /// Every referenced node id, in path then chunk order.
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.files
            .values()
            .flat_map(|r| r.node_ids.iter().cloned())
            .collect()
    }
}

/// Result of loading the persisted map.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredMap {
    /// First run: nothing persisted yet
    Absent,
    /// The last committed map
    Loaded(FileMap),
    /// Bytes exist but could not be parsed
    Corrupt(String),
}

impl StoredMap {
    /// The map, if one was loaded.
    pub fn map(&self) -> Option<&FileMap> {
        match self {
            StoredMap::Loaded(map) => Some(map),
            _ => None,
        }
    }
}

/// Loads and atomically saves the file map.
pub struct FileMapStore {
    path: PathBuf,
}

impl FileMapStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last committed map.
    ///
    /// Unparseable content yields [`StoredMap::Corrupt`]; only I/O errors
    /// other than "not found" are returned as errors.
    pub async fn load(&self) -> Result<StoredMap, IndexerError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No file map yet");
                return Ok(StoredMap::Absent);
            }
            Err(e) => return Err(e.into()),
        };

        let map: FileMap = match serde_json::from_slice(&data) {
            Ok(map) => map,
            Err(e) => {
                let err = IndexerError::CorruptState {
                    path: self.path.clone(),
                    message: e.to_string(),
                };
                warn!(error = %err, "File map unreadable");
                return Ok(StoredMap::Corrupt(e.to_string()));
            }
        };

        if map.version > FILEMAP_VERSION {
            let message = format!("unsupported file map version {}", map.version);
            warn!(path = ?self.path, version = map.version, "File map from a newer format");
            return Ok(StoredMap::Corrupt(message));
        }

        debug!(path = ?self.path, files = map.len(), "Loaded file map");

        Ok(StoredMap::Loaded(map))
    }

    /// Atomically replace the persisted map.
    pub async fn save(&self, map: &FileMap) -> Result<(), IndexerError> {
        let json = serde_json::to_vec_pretty(map)?;
        write_atomic(&self.path, &json).await?;

        info!(path = ?self.path, files = map.len(), nodes = map.node_count(), "Saved file map");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::temp_path_for;
    use tempfile::tempdir;

    fn record(path: &str, hash: &str, ids: &[&str]) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: hash.to_string(),
            node_ids: ids.iter().map(|s| s.to_string()).collect(),
            size: 10,
            last_seen_at: Utc::now(),
        }
    }

    fn sample_map() -> FileMap {
        let mut map = FileMap::new("local:/repo", "openai:text-embedding-3-large#3072");
        map.insert(record("a.py", "h1", &["n1", "n2"]));
        map.insert(record("b.py", "h2", &["n3"]));
        map
    }

    #[test]
    fn test_map_counts() {
        let map = sample_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.node_count(), 3);
        assert_eq!(map.all_node_ids(), vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn test_load_absent() {
        let temp_dir = tempdir().unwrap();
        let store = FileMapStore::new(temp_dir.path().join("filemap.json"));
        assert_eq!(store.load().await.unwrap(), StoredMap::Absent);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileMapStore::new(temp_dir.path().join("filemap.json"));
        let map = sample_map();

        store.save(&map).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.map(), Some(&map));
    }

    #[tokio::test]
    async fn test_load_corrupt() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("filemap.json");
        std::fs::write(&path, b"{\"version\": 1, \"files\": ").unwrap();

        let store = FileMapStore::new(path);
        assert!(matches!(store.load().await.unwrap(), StoredMap::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_load_future_version_is_corrupt() {
        let temp_dir = tempdir().unwrap();
        let store = FileMapStore::new(temp_dir.path().join("filemap.json"));
        let mut map = sample_map();
        map.version = FILEMAP_VERSION + 1;
        store.save(&map).await.unwrap();

        assert!(matches!(store.load().await.unwrap(), StoredMap::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_interrupted_save_leaves_committed_map() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("filemap.json");
        let store = FileMapStore::new(path.clone());

        let committed = sample_map();
        store.save(&committed).await.unwrap();
        let before = std::fs::read(&path).unwrap();

        // Simulate a crash after the temp write but before the rename.
        let mut next = committed.clone();
        next.insert(record("c.py", "h3", &["n4"]));
        std::fs::write(temp_path_for(&path), serde_json::to_vec(&next).unwrap()).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(store.load().await.unwrap().map(), Some(&committed));
    }
}
