//! Applies a diff to the index.
//!
//! Per path the old nodes are deleted before the new ones are inserted. A
//! file that fails at any stage is skipped and keeps its prior record, so the
//! next run sees it again. Once the index was touched for that file, the kept
//! record carries an empty hash and every node id that may still exist.

use super::diff::DiffResult;
use super::policy::RebuildDecision;
use crate::hasher::{hash_bytes, node_id};
use crate::index::{IndexStore, Node, NodeId};
use crate::scanner::{FileSet, ScannedFile};
use crate::split::Splitter;
use crate::storage::{FileMap, FileRecord, StoredMap};
use crate::IndexerError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Where a per-file failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Read,
    Split,
    Delete,
    Insert,
}

/// A file that was skipped this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub stage: FailureStage,
    pub message: String,
}

impl FileFailure {
    fn new(path: &str, stage: FailureStage, err: &IndexerError) -> Self {
        Self {
            path: path.to_string(),
            stage,
            message: err.to_string(),
        }
    }
}

/// Node mutations performed by one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeDelta {
    pub inserted: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    /// The map to commit
    pub file_map: FileMap,
    pub delta: NodeDelta,
    /// Skipped files, sorted by path
    pub failures: Vec<FileFailure>,
}

/// Result of one per-file task.
enum FileOutcome {
    Indexed {
        record: FileRecord,
        inserted: usize,
        deleted: usize,
    },
    Removed {
        deleted: usize,
    },
    Failed {
        failure: FileFailure,
        /// Record to keep in the map, if any
        keep: Option<FileRecord>,
        deleted: usize,
    },
}

/// Drives index mutations for a synchronization run.
pub struct NodeLifecycleManager {
    index: Arc<dyn IndexStore>,
    splitter: Arc<dyn Splitter>,
    parallelism: usize,
}

impl NodeLifecycleManager {
    pub fn new(index: Arc<dyn IndexStore>, splitter: Arc<dyn Splitter>, parallelism: usize) -> Self {
        Self {
            index,
            splitter,
            parallelism: parallelism.max(1),
        }
    }

    /// Apply `diff` to the index and build the map to commit into `target`.
    ///
    /// In full mode every node reachable from the stored map is deleted first
    /// (or the index is purged when there is no readable map), then every
    /// scanned file is indexed as new and `diff` is not consulted. Errors
    /// returned from here are fatal; per-file problems end up in
    /// [`LifecycleOutcome::failures`].
    pub async fn apply(
        &self,
        decision: &RebuildDecision,
        diff: &DiffResult,
        scan: &FileSet,
        stored: &StoredMap,
        mut target: FileMap,
    ) -> Result<LifecycleOutcome, IndexerError> {
        let mut delta = NodeDelta::default();

        let (prior, to_index, to_remove): (Option<&FileMap>, Vec<String>, Vec<String>) =
            if decision.is_full() {
                delta.deleted += self.teardown(stored).await?;
                (None, scan.iter().map(|f| f.path.clone()).collect(), Vec::new())
            } else {
                (
                    stored.map(),
                    diff.to_index().cloned().collect(),
                    diff.removed.iter().cloned().collect(),
                )
            };

        if let Some(prior) = prior {
            for path in &diff.unchanged {
                if let Some(record) = prior.get(path) {
                    target.insert(record.clone());
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for path in to_remove {
            let Some(record) = prior.and_then(|m| m.get(&path)).cloned() else {
                continue;
            };
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IndexerError::Index(e.to_string()))?;
            let index = self.index.clone();
            tasks.spawn(async move {
                let outcome = remove_file(index.as_ref(), record).await;
                drop(permit);
                outcome
            });
        }

        for path in to_index {
            let Some(file) = scan.get(&path).cloned() else {
                continue;
            };
            let previous = prior.and_then(|m| m.get(&path)).cloned();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IndexerError::Index(e.to_string()))?;
            let index = self.index.clone();
            let splitter = self.splitter.clone();
            tasks.spawn(async move {
                let outcome =
                    index_file(index.as_ref(), splitter.as_ref(), file, previous).await;
                drop(permit);
                outcome
            });
        }

        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| IndexerError::Io(std::io::Error::other(e)))?;
            match outcome {
                FileOutcome::Indexed {
                    record,
                    inserted,
                    deleted,
                } => {
                    delta.inserted += inserted;
                    delta.deleted += deleted;
                    target.insert(record);
                }
                FileOutcome::Removed { deleted } => {
                    delta.deleted += deleted;
                }
                FileOutcome::Failed {
                    failure,
                    keep,
                    deleted,
                } => {
                    warn!(
                        path = %failure.path,
                        stage = ?failure.stage,
                        error = %failure.message,
                        "Skipping file"
                    );
                    delta.deleted += deleted;
                    if let Some(record) = keep {
                        target.insert(record);
                    }
                    failures.push(failure);
                }
            }
        }

        failures.sort_by(|a, b| a.path.cmp(&b.path));

        info!(
            files = target.len(),
            inserted = delta.inserted,
            deleted = delta.deleted,
            skipped = failures.len(),
            "Applied changes"
        );

        Ok(LifecycleOutcome {
            file_map: target,
            delta,
            failures,
        })
    }

    /// Remove everything the previous build left behind.
    async fn teardown(&self, stored: &StoredMap) -> Result<usize, IndexerError> {
        match stored {
            StoredMap::Loaded(map) => {
                let ids = map.all_node_ids();
                if ids.is_empty() {
                    return Ok(0);
                }
                debug!(nodes = ids.len(), "Deleting all previous nodes");
                self.index.delete(&ids).await?;
                Ok(ids.len())
            }
            StoredMap::Absent | StoredMap::Corrupt(_) => {
                debug!("Purging index, no readable file map");
                self.index.purge().await?;
                Ok(0)
            }
        }
    }
}

async fn remove_file(index: &dyn IndexStore, record: FileRecord) -> FileOutcome {
    if record.node_ids.is_empty() {
        return FileOutcome::Removed { deleted: 0 };
    }

    match index.delete(&record.node_ids).await {
        Ok(()) => {
            debug!(path = %record.path, nodes = record.node_ids.len(), "Removed file");
            FileOutcome::Removed {
                deleted: record.node_ids.len(),
            }
        }
        Err(e) => FileOutcome::Failed {
            failure: FileFailure::new(&record.path, FailureStage::Delete, &e),
            keep: Some(record),
            deleted: 0,
        },
    }
}

/// Keep `record` but make sure the next diff classifies its file as modified.
///
/// Real content hashes are never empty.
fn mark_stale(record: FileRecord) -> FileRecord {
    FileRecord {
        content_hash: String::new(),
        ..record
    }
}

async fn index_file(
    index: &dyn IndexStore,
    splitter: &dyn Splitter,
    file: ScannedFile,
    previous: Option<FileRecord>,
) -> FileOutcome {
    let failed = |stage, err: IndexerError, keep: Option<FileRecord>, deleted| FileOutcome::Failed {
        failure: FileFailure::new(&file.path, stage, &err),
        keep,
        deleted,
    };

    let bytes = match file.read().await {
        Ok(bytes) => bytes,
        Err(e) => return failed(FailureStage::Read, e, previous, 0),
    };

    let content_hash = hash_bytes(&bytes);
    let content = String::from_utf8_lossy(&bytes);

    // Split before touching the index so a rejected file keeps its old nodes.
    let chunks = match splitter.split(&file.path, &content) {
        Ok(chunks) => chunks,
        Err(e) => return failed(FailureStage::Split, e, previous, 0),
    };

    let nodes: Vec<Node> = chunks
        .into_iter()
        .enumerate()
        .map(|(seq, text)| Node {
            id: node_id(&file.path, seq, &content_hash),
            path: file.path.clone(),
            seq,
            content_hash: content_hash.clone(),
            text,
        })
        .collect();
    let node_ids: Vec<NodeId> = nodes.iter().map(|n| n.id.clone()).collect();

    let mut deleted = 0;
    if let Some(prev) = previous.as_ref().filter(|p| !p.node_ids.is_empty()) {
        if let Err(e) = index.delete(&prev.node_ids).await {
            // Some old nodes may already be gone.
            return failed(FailureStage::Delete, e, previous.map(mark_stale), 0);
        }
        deleted = prev.node_ids.len();
    }

    if !nodes.is_empty() {
        if let Err(e) = index.insert(nodes).await {
            // A partial insert may have left nodes behind.
            let leftover = match index.delete(&node_ids).await {
                Ok(()) => Vec::new(),
                Err(cleanup) => {
                    warn!(
                        path = %file.path,
                        nodes = node_ids.len(),
                        error = %cleanup,
                        "Failed to remove nodes of rejected insert"
                    );
                    node_ids.clone()
                }
            };

            // Old nodes are gone. Record whatever may still exist under a
            // stale hash so the next run deletes it and re-indexes the file.
            let keep = if previous.is_some() || !leftover.is_empty() {
                Some(mark_stale(FileRecord {
                    path: file.path.clone(),
                    content_hash: content_hash.clone(),
                    node_ids: leftover,
                    size: bytes.len() as u64,
                    last_seen_at: Utc::now(),
                }))
            } else {
                None
            };
            return failed(FailureStage::Insert, e, keep, deleted);
        }
    }

    debug!(
        path = %file.path,
        nodes = node_ids.len(),
        replaced = deleted,
        "Indexed file"
    );

    FileOutcome::Indexed {
        inserted: node_ids.len(),
        deleted,
        record: FileRecord {
            path: file.path.clone(),
            content_hash,
            node_ids,
            size: bytes.len() as u64,
            last_seen_at: Utc::now(),
        },
    }
}
