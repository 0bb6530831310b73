//! File set scanner.
//!
//! Enumerates the files of a local root under extension, include-path and
//! size rules, hashing each accepted file. File content itself is read lazily
//! through [`ScannedFile::read`], so a [`FileSet`] can be iterated any number
//! of times.

mod walker;

pub use walker::{relative_path, FileEntry, Walker};

use crate::IndexerError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Inclusion rules applied to every candidate file.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// Allowed first path components; root-level files always pass (empty = all)
    pub include: Vec<String>,
    /// Allowed suffixes including the leading dot (empty = all)
    pub extensions: Vec<String>,
    /// Files larger than this many bytes are skipped
    pub max_file_size: u64,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            extensions: Vec::new(),
            max_file_size: 1024 * 1024, // 1MB
        }
    }
}

impl ScanFilter {
    /// Check the include and extension rules for a source-relative path.
    pub fn accepts_path(&self, rel_path: &str) -> bool {
        let mut parts = rel_path.split('/');
        let first = parts.next().unwrap_or_default();
        let nested = parts.next().is_some();

        if nested && !self.include.is_empty() && !self.include.iter().any(|dir| dir == first) {
            return false;
        }

        if self.extensions.is_empty() {
            return true;
        }

        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        match file_name.rfind('.') {
            Some(idx) if idx > 0 => {
                let suffix = &file_name[idx..];
                self.extensions.iter().any(|ext| ext == suffix)
            }
            _ => false,
        }
    }

    /// Check every rule, including the size limit.
    pub fn accepts(&self, rel_path: &str, size: u64) -> bool {
        size <= self.max_file_size && self.accepts_path(rel_path)
    }
}

/// Options for scanning a source root.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Inclusion rules
    pub filter: ScanFilter,
    /// Whether to follow symlinks
    pub follow_symlinks: bool,
    /// Whether `.gitignore` files are honoured
    pub respect_gitignore: bool,
    /// Directories never scanned (e.g. the index location itself)
    pub exclude: Vec<PathBuf>,
    /// Number of walker threads
    pub parallelism: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            filter: ScanFilter::default(),
            follow_symlinks: false,
            respect_gitignore: true,
            exclude: Vec::new(),
            parallelism: num_cpus(),
        }
    }
}

/// One file of the current scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Canonical source-relative path
    pub path: String,
    /// Absolute location on disk
    pub abs_path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Content hash, `None` when the file could not be read during the scan
    pub hash: Option<String>,
}

impl ScannedFile {
    /// Read the raw content.
    pub async fn read(&self) -> Result<Vec<u8>, IndexerError> {
        Ok(tokio::fs::read(&self.abs_path).await?)
    }
}

/// The set of files currently present in a source.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    /// Root that was scanned
    pub root: PathBuf,
    /// Files sorted by path
    pub files: Vec<ScannedFile>,
    by_path: HashMap<String, usize>,
    /// Scan duration in milliseconds
    pub duration_ms: u64,
}

impl FileSet {
    /// Build a file set from scanned files.
    pub fn new(root: PathBuf, mut files: Vec<ScannedFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.path == b.path);
        let by_path = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), i))
            .collect();
        Self {
            root,
            files,
            by_path,
            duration_ms: 0,
        }
    }

    /// Look up a file by canonical path.
    pub fn get(&self, path: &str) -> Option<&ScannedFile> {
        self.by_path.get(path).map(|&i| &self.files[i])
    }

    /// Iterate over the files in path order.
    pub fn iter(&self) -> impl Iterator<Item = &ScannedFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Scans a local root into a [`FileSet`].
#[derive(Debug, Clone)]
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    /// Create a new scanner with default options.
    pub fn new() -> Self {
        Self {
            options: ScanOptions::default(),
        }
    }

    /// Create a scanner with custom options.
    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan a directory.
    pub async fn scan(&self, root: &Path) -> Result<FileSet, IndexerError> {
        let start = Instant::now();

        let root = root
            .canonicalize()
            .map_err(|_| IndexerError::NotFound(root.to_path_buf()))?;

        info!(path = ?root, "Starting scan");

        let options = self.options.clone();
        let walk_root = root.clone();
        let entries = tokio::task::spawn_blocking(move || {
            let filter = options.filter;
            Walker::new(&walk_root, options.follow_symlinks)
                .respect_gitignore(options.respect_gitignore)
                .threads(options.parallelism)
                .exclude(options.exclude)
                .walk(|rel, size| {
                    let keep = filter.accepts(rel, size);
                    if !keep {
                        debug!(path = rel, size, "Excluded by filter");
                    }
                    keep
                })
        })
        .await
        .map_err(|e| IndexerError::Io(std::io::Error::other(e)))??;

        let files = entries
            .into_iter()
            .map(|entry| ScannedFile {
                path: entry.rel_path,
                abs_path: entry.path,
                size: entry.size,
                hash: entry.hash,
            })
            .collect();

        let mut set = FileSet::new(root, files);
        set.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            files = set.len(),
            unreadable = set.iter().filter(|f| f.hash.is_none()).count(),
            duration_ms = set.duration_ms,
            "Scan complete"
        );

        Ok(set)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the number of CPUs available.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn python_filter() -> ScanFilter {
        ScanFilter {
            include: vec!["src".to_string(), "tests".to_string()],
            extensions: vec![".py".to_string(), ".md".to_string()],
            max_file_size: 64,
        }
    }

    #[test]
    fn test_filter_include_paths() {
        let filter = python_filter();
        assert!(filter.accepts_path("src/pkg/mod.py"));
        assert!(filter.accepts_path("tests/test_mod.py"));
        assert!(filter.accepts_path("setup.py"));
        assert!(!filter.accepts_path("build/lib/mod.py"));
    }

    #[test]
    fn test_filter_extensions() {
        let filter = python_filter();
        assert!(filter.accepts_path("README.md"));
        assert!(!filter.accepts_path("src/data.json"));
        assert!(!filter.accepts_path("src/Makefile"));
        assert!(!filter.accepts_path("src/.py"));
    }

    #[test]
    fn test_filter_empty_lists_accept_everything() {
        let filter = ScanFilter::default();
        assert!(filter.accepts_path("anything/at/all.bin"));
        assert!(filter.accepts_path("Makefile"));
    }

    #[test]
    fn test_filter_size_limit() {
        let filter = python_filter();
        assert!(filter.accepts("src/a.py", 64));
        assert!(!filter.accepts("src/a.py", 65));
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = tempdir().unwrap();
        let scanner = Scanner::new();

        let set = scanner.scan(temp_dir.path()).await.unwrap();

        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_scan_applies_filter() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("src/a.py"), "print('a')").unwrap();
        fs::write(root.join("src/big.py"), "x".repeat(100)).unwrap();
        fs::write(root.join("src/data.json"), "{}").unwrap();
        fs::write(root.join("vendor/lib.py"), "pass").unwrap();
        fs::write(root.join("README.md"), "# hi").unwrap();

        let scanner = Scanner::with_options(ScanOptions {
            filter: python_filter(),
            ..Default::default()
        });
        let set = scanner.scan(root).await.unwrap();

        let paths: Vec<_> = set.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/a.py"]);
        assert!(set.get("src/a.py").unwrap().hash.is_some());
    }

    #[tokio::test]
    async fn test_scan_is_restartable_and_reads_lazily() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "one").unwrap();

        let set = Scanner::new().scan(temp_dir.path()).await.unwrap();
        let first: Vec<_> = set.iter().map(|f| f.path.clone()).collect();
        let second: Vec<_> = set.iter().map(|f| f.path.clone()).collect();
        assert_eq!(first, second);

        let content = set.get("a.py").unwrap().read().await.unwrap();
        assert_eq!(content, b"one");
    }

    #[tokio::test]
    async fn test_scan_missing_root() {
        let temp_dir = tempdir().unwrap();
        let result = Scanner::new().scan(&temp_dir.path().join("missing")).await;
        assert!(matches!(result, Err(IndexerError::NotFound(_))));
    }
}
