//! Index contexts.
//!
//! An [`IndexContext`] is the explicit handle every command works through: a
//! resolved profile, its index location and the source it indexes.

use crate::{CoreError, EmbedSpec, Profile};
use ragsync_indexer::scanner::ScanOptions;
use ragsync_indexer::storage::{FileMapStore, ManifestWriter};
use ragsync_indexer::{
    FileNodeStore, IndexLocation, LineSplitter, LocalSource, Manifest, RemoteSource, ScanFilter,
    Scanner, SourceProvider, StoredMap, SyncOptions, Synchronizer, WatchFilter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Where the files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Local(PathBuf),
    Remote { repo: String, git_ref: String },
}

/// What `inspect` reports about an index location.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub persist: PathBuf,
    /// `absent`, `loaded` or `corrupt`
    pub state: String,
    pub files: usize,
    pub nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

pub struct IndexContext {
    profile: Profile,
    embed: EmbedSpec,
    location: IndexLocation,
    source_spec: SourceSpec,
    source: Arc<dyn SourceProvider>,
}

impl IndexContext {
    /// Resolve `profile` into a usable context.
    ///
    /// A local `path` wins over `repo`. Nothing is written here.
    pub fn open(profile: Profile) -> Result<Self, CoreError> {
        let embed = profile.embed_spec()?;
        let location = IndexLocation::new(absolute(&profile.persist_dir()));

        let source_spec = match (profile.local_path(), &profile.repo) {
            (Some(path), _) => SourceSpec::Local(path),
            (None, Some(repo)) => SourceSpec::Remote {
                repo: repo.clone(),
                git_ref: profile.git_ref.clone(),
            },
            (None, None) => return Err(CoreError::NoSource),
        };

        let scanner = Scanner::with_options(scan_options(&profile, &location));
        let source: Arc<dyn SourceProvider> = match &source_spec {
            SourceSpec::Local(path) => Arc::new(LocalSource::new(path, scanner)?),
            SourceSpec::Remote { repo, git_ref } => Arc::new(RemoteSource::new(
                repo,
                git_ref,
                location.source_snapshot_dir(),
                scanner,
            )?),
        };

        info!(
            profile = %profile.name,
            source = %source.fingerprint(),
            embed = %embed.fingerprint(),
            persist = ?location.dir(),
            "Opened index context"
        );

        Ok(Self {
            profile,
            embed,
            location,
            source_spec,
            source,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn embed(&self) -> &EmbedSpec {
        &self.embed
    }

    pub fn location(&self) -> &IndexLocation {
        &self.location
    }

    pub fn source_spec(&self) -> &SourceSpec {
        &self.source_spec
    }

    pub fn source(&self) -> Arc<dyn SourceProvider> {
        self.source.clone()
    }

    /// Root directory of a local source.
    pub fn source_root(&self) -> Option<&Path> {
        match &self.source_spec {
            SourceSpec::Local(path) => Some(path),
            SourceSpec::Remote { .. } => None,
        }
    }

    /// Build a synchronizer over the bundled file-backed node store.
    pub async fn synchronizer(&self, force_full: bool) -> Result<Synchronizer, CoreError> {
        let store = FileNodeStore::open(self.location.nodes_path(), self.embed.dimension).await?;
        let splitter = LineSplitter::new(self.profile.chunk_lines, self.profile.chunk_overlap);

        Ok(Synchronizer::new(
            self.location.clone(),
            self.source.clone(),
            Arc::new(splitter),
            Arc::new(store),
            SyncOptions {
                parallelism: self.profile.parallel.max(1),
                embed_fingerprint: self.embed.fingerprint(),
                force_full,
            },
        ))
    }

    /// Which watched paths should trigger a rebuild; local sources only.
    pub fn watch_filter(&self) -> Option<WatchFilter> {
        let root = self.source_root()?.canonicalize().ok()?;
        Some(WatchFilter::new(
            root,
            scan_filter(&self.profile),
            vec![self.location.dir().to_path_buf()],
        ))
    }

    /// Summarize the persisted state without modifying it.
    pub async fn inspect(&self) -> Result<IndexSummary, CoreError> {
        inspect(&self.location).await
    }
}

/// Summarize an index location; needs no source.
pub async fn inspect(location: &IndexLocation) -> Result<IndexSummary, CoreError> {
    let stored = FileMapStore::new(location.filemap_path()).load().await?;
    let manifest = match ManifestWriter::new(location.manifest_path()).read().await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(error = %e, "Manifest unreadable");
            None
        }
    };

    let (state, map) = match &stored {
        StoredMap::Absent => ("absent", None),
        StoredMap::Loaded(map) => ("loaded", Some(map)),
        StoredMap::Corrupt(_) => ("corrupt", None),
    };

    Ok(IndexSummary {
        persist: location.dir().to_path_buf(),
        state: state.to_string(),
        files: map.map_or(0, |m| m.len()),
        nodes: map.map_or(0, |m| m.node_count()),
        source_fingerprint: map.map(|m| m.source_fingerprint.clone()),
        embed_fingerprint: map.map(|m| m.embed_fingerprint.clone()),
        manifest,
    })
}

fn scan_filter(profile: &Profile) -> ScanFilter {
    ScanFilter {
        include: profile.include.clone(),
        extensions: profile.ext.clone(),
        max_file_size: profile.max_file_size(),
    }
}

fn scan_options(profile: &Profile, location: &IndexLocation) -> ScanOptions {
    ScanOptions {
        filter: scan_filter(profile),
        exclude: vec![location.dir().to_path_buf()],
        ..Default::default()
    }
}

/// Canonical form of `path`, also for a not yet created final component.
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
