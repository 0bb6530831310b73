//! Synchronization driver.
//!
//! One call to [`Synchronizer::synchronize`] scans the source, decides the
//! rebuild mode, applies the diff to the index and commits the new file map.
//! The file map is only replaced after every index mutation was flushed, so a
//! crash mid-run leaves the previous map in place and the next run redoes the
//! work.

mod diff;
mod lifecycle;
mod policy;

pub use diff::{diff, diff_file_set, DiffResult};
pub use lifecycle::{FailureStage, FileFailure, LifecycleOutcome, NodeDelta, NodeLifecycleManager};
pub use policy::{BuildMode, FullReason, RebuildDecision, RebuildPolicy};

use crate::index::IndexStore;
use crate::source::SourceProvider;
use crate::split::Splitter;
use crate::storage::{FileMap, FileMapStore, IndexLocation, Manifest, ManifestWriter};
use crate::watcher::SyncRunner;
use crate::IndexerError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Options for a [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of files processed concurrently
    pub parallelism: usize,
    /// `<backend>:<model>#<dimension>` of the embedding in use
    pub embed_fingerprint: String,
    /// Rebuild from scratch even when fingerprints match
    pub force_full: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            parallelism: 8,
            embed_fingerprint: String::new(),
            force_full: false,
        }
    }
}

/// Outcome of a completed synchronization.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Summary as written to `manifest.json`
    pub manifest: Manifest,
    pub diff: DiffResult,
    pub delta: NodeDelta,
    /// Set when the manifest could not be written; the file map was still committed
    pub manifest_error: Option<String>,
}

impl SyncReport {
    pub fn mode(&self) -> BuildMode {
        self.manifest.mode
    }

    pub fn failures(&self) -> &[FileFailure] {
        &self.manifest.failures
    }
}

/// Brings an index location up to date with a source.
pub struct Synchronizer {
    location: IndexLocation,
    source: Arc<dyn SourceProvider>,
    index: Arc<dyn IndexStore>,
    lifecycle: NodeLifecycleManager,
    filemap: FileMapStore,
    manifest: ManifestWriter,
    policy: RebuildPolicy,
    embed_fingerprint: String,
}

impl Synchronizer {
    pub fn new(
        location: IndexLocation,
        source: Arc<dyn SourceProvider>,
        splitter: Arc<dyn Splitter>,
        index: Arc<dyn IndexStore>,
        options: SyncOptions,
    ) -> Self {
        let lifecycle = NodeLifecycleManager::new(index.clone(), splitter, options.parallelism);
        Self {
            filemap: FileMapStore::new(location.filemap_path()),
            manifest: ManifestWriter::new(location.manifest_path()),
            location,
            source,
            index,
            lifecycle,
            policy: RebuildPolicy::new(options.force_full),
            embed_fingerprint: options.embed_fingerprint,
        }
    }

    pub fn location(&self) -> &IndexLocation {
        &self.location
    }

    pub fn source(&self) -> &Arc<dyn SourceProvider> {
        &self.source
    }

    /// Run one synchronization.
    ///
    /// Scan and file map persistence failures are returned as errors. A
    /// failed scan happens before any mutation. Per-file failures are part of
    /// the report.
    pub async fn synchronize(&self) -> Result<SyncReport, IndexerError> {
        let start = Instant::now();
        let source_fingerprint = self.source.fingerprint();

        info!(source = %source_fingerprint, location = ?self.location.dir(), "Synchronizing");

        let scan = self.source.scan().await?;

        self.location.ensure().await?;
        let stored = self.filemap.load().await?;

        let mut decision = self
            .policy
            .decide(&stored, &source_fingerprint, &self.embed_fingerprint);
        if let (false, Some(message)) = (decision.is_full(), self.index.corruption()) {
            decision = RebuildDecision::Full(FullReason::CorruptState { message });
        }
        if let Some(reason) = decision.reason() {
            info!(reason = %reason, "Full rebuild");
        }

        let baseline = if decision.is_full() { None } else { stored.map() };
        let diff = diff_file_set(&scan, baseline);

        info!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            removed = diff.removed.len(),
            unchanged = diff.unchanged.len(),
            "Computed changes"
        );

        let target = FileMap::new(&source_fingerprint, &self.embed_fingerprint);
        let outcome = self
            .lifecycle
            .apply(&decision, &diff, &scan, &stored, target)
            .await?;

        self.index.flush().await?;
        self.filemap.save(&outcome.file_map).await?;

        let manifest = Manifest {
            built_at: Utc::now(),
            mode: decision.mode(),
            full_reason: decision.reason().cloned(),
            file_count: outcome.file_map.len(),
            node_count: outcome.file_map.node_count(),
            embed_fingerprint: self.embed_fingerprint.clone(),
            source_fingerprint,
            duration_ms: start.elapsed().as_millis() as u64,
            added: diff.added.len(),
            modified: diff.modified.len(),
            removed: diff.removed.len(),
            unchanged: diff.unchanged.len(),
            nodes_inserted: outcome.delta.inserted,
            nodes_deleted: outcome.delta.deleted,
            skipped_count: outcome.failures.len(),
            failures: outcome.failures,
        };

        let manifest_error = match self.manifest.write(&manifest).await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to write manifest");
                Some(e.to_string())
            }
        };

        info!(
            mode = ?manifest.mode,
            files = manifest.file_count,
            nodes = manifest.node_count,
            skipped = manifest.skipped_count,
            duration_ms = manifest.duration_ms,
            "Synchronization complete"
        );

        Ok(SyncReport {
            manifest,
            diff,
            delta: outcome.delta,
            manifest_error,
        })
    }
}

#[async_trait]
impl SyncRunner for Synchronizer {
    async fn run_sync(&self) -> Result<(), IndexerError> {
        let report = self.synchronize().await?;
        if !report.failures().is_empty() {
            warn!(skipped = report.failures().len(), "Some files were skipped");
        }
        Ok(())
    }
}
