//! File-backed index store.
//!
//! Keeps nodes in memory and persists them as MessagePack on
//! [`flush`](IndexStore::flush). The synchronizer flushes before it commits
//! the file map, so the map never references nodes that were not persisted.
//!
//! An unreadable file opens as an empty store that reports itself corrupt
//! until the next successful flush.

use super::write_atomic;
use crate::index::{IndexStore, Node, NodeId};
use crate::IndexerError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct FileNodeStore {
    path: PathBuf,
    dimension: usize,
    nodes: RwLock<HashMap<NodeId, Node>>,
    dirty: AtomicBool,
    corruption: Mutex<Option<String>>,
}

impl FileNodeStore {
    /// Open the store at `path`, loading existing nodes.
    pub async fn open(path: PathBuf, dimension: usize) -> Result<Self, IndexerError> {
        let mut corruption = None;
        let nodes = match tokio::fs::read(&path).await {
            Ok(data) => match rmp_serde::from_slice::<Vec<Node>>(&data) {
                Ok(nodes) => nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
                Err(e) => {
                    let err = IndexerError::CorruptState {
                        path: path.clone(),
                        message: e.to_string(),
                    };
                    warn!(error = %err, "Node store unreadable, starting empty");
                    corruption = Some(format!("node store unreadable: {}", e));
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = ?path, nodes = nodes.len(), "Opened node store");

        Ok(Self {
            path,
            dimension,
            nodes: RwLock::new(nodes),
            // A corrupt file is rewritten by the next flush.
            dirty: AtomicBool::new(corruption.is_some()),
            corruption: Mutex::new(corruption),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.nodes.read().get(id).cloned()
    }
}

#[async_trait]
impl IndexStore for FileNodeStore {
    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, nodes: Vec<Node>) -> Result<(), IndexerError> {
        let mut map = self.nodes.write();
        for node in nodes {
            map.insert(node.id.clone(), node);
        }
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, ids: &[NodeId]) -> Result<(), IndexerError> {
        let mut map = self.nodes.write();
        for id in ids {
            map.remove(id);
        }
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn purge(&self) -> Result<(), IndexerError> {
        self.nodes.write().clear();
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexerError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let data = {
            let map = self.nodes.read();
            let mut nodes: Vec<&Node> = map.values().collect();
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            rmp_serde::to_vec(&nodes)?
        };

        if let Err(e) = write_atomic(&self.path, &data).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }

        self.corruption.lock().take();
        info!(path = ?self.path, size = data.len(), "Flushed node store");

        Ok(())
    }

    async fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    fn corruption(&self) -> Option<String> {
        self.corruption.lock().clone()
    }
}
