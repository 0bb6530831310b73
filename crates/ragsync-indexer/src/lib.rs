//! ragsync Indexer
//!
//! This crate keeps a retrieval index in step with a source tree:
//! - Filtered, gitignore-aware scanning of local and remote (git) sources
//! - Content hashing and a durable file map with atomic saves
//! - Change detection and the incremental vs full rebuild decision
//! - Per-file node lifecycle (delete, split, insert) on a bounded worker pool
//! - Build manifests
//! - File watching with debounced re-synchronization

mod error;
pub mod hasher;
pub mod index;
pub mod scanner;
pub mod source;
pub mod split;
pub mod storage;
pub mod sync;
pub mod watcher;

pub use error::IndexerError;
pub use index::{IndexOp, IndexStore, MemoryIndexStore, Node, NodeId};
pub use scanner::{FileSet, ScanFilter, ScanOptions, ScannedFile, Scanner};
pub use source::{LocalSource, RemoteSource, SourceProvider};
pub use split::{LineSplitter, Splitter};
pub use storage::{
    FileMap, FileMapStore, FileNodeStore, FileRecord, IndexLocation, Manifest, ManifestWriter,
    StoredMap,
};
pub use sync::{
    BuildMode, DiffResult, FailureStage, FileFailure, FullReason, NodeDelta, RebuildDecision,
    RebuildPolicy, SyncOptions, SyncReport, Synchronizer,
};
pub use watcher::{
    ChangeKind, FileChange, FileWatcher, SyncRunner, WatchFilter, WatchHandle, WatchLoop,
    WatchStats, WatcherOptions,
};
