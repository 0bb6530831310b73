//! Index storage boundary.
//!
//! The synchronizer only owns the mapping from files to node identifiers.
//! Node payloads (text, vectors) belong to an [`IndexStore`]; embedding is the
//! store's concern.

use crate::IndexerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Opaque node identifier.
pub type NodeId = String;

/// One indexed chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier derived from (path, seq, content hash)
    pub id: NodeId,
    /// Owning file
    pub path: String,
    /// Chunk position within the file
    pub seq: usize,
    /// Hash of the file content the chunk was cut from
    pub content_hash: String,
    /// Chunk text
    pub text: String,
}

/// Storage for indexed nodes.
///
/// `delete` must tolerate identifiers that are already gone, so a retried
/// deletion after a partial failure is safe.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Vector dimensionality of every node in this index.
    fn embedding_dimension(&self) -> usize;

    /// Insert (or replace) nodes.
    async fn insert(&self, nodes: Vec<Node>) -> Result<(), IndexerError>;

    /// Delete nodes by id.
    async fn delete(&self, ids: &[NodeId]) -> Result<(), IndexerError>;

    /// Drop every node.
    async fn purge(&self) -> Result<(), IndexerError>;

    /// Make pending mutations durable.
    async fn flush(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Number of nodes currently stored.
    async fn node_count(&self) -> usize;

    /// Why the stored nodes cannot be trusted, if they cannot. The
    /// synchronizer answers this with a full rebuild.
    fn corruption(&self) -> Option<String> {
        None
    }
}

/// A mutation observed by [`MemoryIndexStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    Insert(Vec<NodeId>),
    Delete(Vec<NodeId>),
    Purge,
}

#[derive(Default)]
struct MemoryInner {
    nodes: HashMap<NodeId, Node>,
    ops: Vec<IndexOp>,
    failing_paths: HashSet<String>,
}

/// In-memory index store that records every mutation.
///
/// Inserts touching a path registered with [`fail_path`](Self::fail_path)
/// are rejected, which lets callers exercise per-file failure handling.
pub struct MemoryIndexStore {
    dimension: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryIndexStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Reject future inserts for `path`.
    pub fn fail_path(&self, path: &str) {
        self.inner.lock().failing_paths.insert(path.to_string());
    }

    /// Accept inserts for `path` again.
    pub fn heal_path(&self, path: &str) {
        self.inner.lock().failing_paths.remove(path);
    }

    /// Mutations since creation or the last [`clear_ops`](Self::clear_ops).
    pub fn ops(&self) -> Vec<IndexOp> {
        self.inner.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().ops.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().nodes.contains_key(id)
    }

    /// All stored ids, sorted.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.inner.lock().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        self.inner.lock().nodes.get(id).cloned()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    async fn insert(&self, nodes: Vec<Node>) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock();
        if let Some(node) = nodes.iter().find(|n| inner.failing_paths.contains(&n.path)) {
            return Err(IndexerError::Index(format!(
                "insert rejected for {}",
                node.path
            )));
        }
        inner
            .ops
            .push(IndexOp::Insert(nodes.iter().map(|n| n.id.clone()).collect()));
        for node in nodes {
            inner.nodes.insert(node.id.clone(), node);
        }
        Ok(())
    }

    async fn delete(&self, ids: &[NodeId]) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock();
        inner.ops.push(IndexOp::Delete(ids.to_vec()));
        for id in ids {
            inner.nodes.remove(id);
        }
        Ok(())
    }

    async fn purge(&self) -> Result<(), IndexerError> {
        let mut inner = self.inner.lock();
        inner.ops.push(IndexOp::Purge);
        inner.nodes.clear();
        Ok(())
    }

    async fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}
