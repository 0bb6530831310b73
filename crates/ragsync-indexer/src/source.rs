//! Source providers: where the file set comes from.
//!
//! A local source scans a directory in place. A remote source first
//! materializes a shallow `git` snapshot of `owner/repo@ref` and then scans
//! the snapshot; if the snapshot cannot be fetched after the configured
//! retries the run fails with [`IndexerError::SourceUnreachable`] before any
//! persisted state is touched.
//!
//! Snapshots are fetched by URL, so no remote is recorded in the snapshot's
//! `.git/config`. A `GITHUB_TOKEN` reaches git only through a credential
//! helper in its environment and never appears in a URL or argument.

use crate::scanner::{FileSet, Scanner};
use crate::IndexerError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Supplies the current file set and an identity for it.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Identifies the source (local path vs remote repository + ref).
    fn fingerprint(&self) -> String;

    /// Enumerate the current files.
    async fn scan(&self) -> Result<FileSet, IndexerError>;
}

/// A directory on the local file system.
pub struct LocalSource {
    root: PathBuf,
    scanner: Scanner,
}

impl LocalSource {
    /// Create a local source; the root must exist.
    pub fn new(root: &Path, scanner: Scanner) -> Result<Self, IndexerError> {
        let root = root.canonicalize().map_err(|e| IndexerError::SourceUnreachable {
            fingerprint: format!("local:{}", root.display()),
            message: e.to_string(),
        })?;
        Ok(Self { root, scanner })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SourceProvider for LocalSource {
    fn fingerprint(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn scan(&self) -> Result<FileSet, IndexerError> {
        if !self.root.is_dir() {
            return Err(IndexerError::SourceUnreachable {
                fingerprint: self.fingerprint(),
                message: "root directory no longer exists".to_string(),
            });
        }
        self.scanner.scan(&self.root).await
    }
}

/// Default host for `owner/repo` sources.
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";

/// Answers credential requests from `$GITHUB_TOKEN` in git's environment.
const TOKEN_CREDENTIAL_HELPER: &str =
    "!f() { echo username=x-access-token; echo \"password=$GITHUB_TOKEN\"; }; f";

/// A remote `git` repository pinned to a ref.
pub struct RemoteSource {
    repo: String,
    git_ref: String,
    base_url: String,
    snapshot_dir: PathBuf,
    scanner: Scanner,
    attempts: u32,
    backoff: Duration,
}

impl RemoteSource {
    /// Create a remote source for `owner/repo` at `git_ref`, materialized into `snapshot_dir`.
    pub fn new(
        repo: &str,
        git_ref: &str,
        snapshot_dir: PathBuf,
        scanner: Scanner,
    ) -> Result<Self, IndexerError> {
        let valid = matches!(
            repo.split('/').collect::<Vec<_>>().as_slice(),
            [owner, name] if !owner.is_empty() && !name.is_empty()
        );
        if !valid {
            return Err(IndexerError::InvalidSource(format!(
                "expected owner/repo, got '{}'",
                repo
            )));
        }
        if git_ref.is_empty() {
            return Err(IndexerError::InvalidSource("empty git ref".to_string()));
        }

        Ok(Self {
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            base_url: DEFAULT_REMOTE_BASE.to_string(),
            snapshot_dir,
            scanner,
            attempts: 3,
            backoff: Duration::from_secs(2),
        })
    }

    /// Override the host (e.g. a mirror or a `file://` URL).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override the retry policy; `attempts` is clamped to at least one.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    fn fetch_url(&self) -> String {
        format!("{}/{}.git", self.base_url, self.repo)
    }

    /// Token to offer the host, only ever over https.
    fn token(&self) -> Option<String> {
        if !self.base_url.starts_with("https://") {
            return None;
        }
        std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }

    /// Fetch or refresh the local snapshot, retrying with linear backoff.
    pub async fn materialize(&self) -> Result<PathBuf, IndexerError> {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.fetch_once().await {
                Ok(()) => {
                    info!(repo = %self.repo, git_ref = %self.git_ref, path = ?self.snapshot_dir, "Snapshot ready");
                    return Ok(self.snapshot_dir.clone());
                }
                Err(e) => {
                    warn!(attempt, attempts = self.attempts, error = %e, "Snapshot fetch failed");
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        Err(IndexerError::SourceUnreachable {
            fingerprint: self.fingerprint(),
            message: last_error,
        })
    }

    async fn fetch_once(&self) -> Result<(), IndexerError> {
        let url = self.fetch_url();
        let token = self.token();

        if self.snapshot_dir.join(".git").is_dir() {
            return fetch_into(&self.snapshot_dir, &url, &self.git_ref, token.as_deref()).await;
        }

        // Fetch next to the target and swap it in, so a failed fetch never
        // leaves a half-populated snapshot behind.
        let staging = self.snapshot_dir.with_extension("staging");
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging_str = staging.to_string_lossy().to_string();
        let fetched = async {
            run_git(&["init", "--quiet", &staging_str], None).await?;
            fetch_into(&staging, &url, &self.git_ref, token.as_deref()).await
        }
        .await;
        if let Err(e) = fetched {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if self.snapshot_dir.exists() {
            tokio::fs::remove_dir_all(&self.snapshot_dir).await?;
        }
        tokio::fs::rename(&staging, &self.snapshot_dir).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for RemoteSource {
    fn fingerprint(&self) -> String {
        format!("github:{}@{}", self.repo, self.git_ref)
    }

    async fn scan(&self) -> Result<FileSet, IndexerError> {
        let root = self.materialize().await?;
        self.scanner.scan(&root).await
    }
}

/// Shallow-fetch `git_ref` from `url` into the repository at `dir` and check it out.
async fn fetch_into(
    dir: &Path,
    url: &str,
    git_ref: &str,
    token: Option<&str>,
) -> Result<(), IndexerError> {
    let dir = dir.to_string_lossy().to_string();
    run_git(
        &["-C", &dir, "fetch", "--quiet", "--depth", "1", url, git_ref],
        token,
    )
    .await?;
    run_git(&["-C", &dir, "checkout", "--quiet", "--force", "FETCH_HEAD"], None).await
}

fn git_command(args: &[&str], token: Option<&str>) -> Command {
    let mut command = Command::new("git");
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null());
    if let Some(token) = token {
        command
            .env("GITHUB_TOKEN", token)
            .env("GIT_CONFIG_COUNT", "1")
            .env("GIT_CONFIG_KEY_0", "credential.helper")
            .env("GIT_CONFIG_VALUE_0", TOKEN_CREDENTIAL_HELPER);
    }
    command
}

async fn run_git(args: &[&str], token: Option<&str>) -> Result<(), IndexerError> {
    debug!(?args, authenticated = token.is_some(), "Running git");

    let output = git_command(args, token)
        .output()
        .await
        .map_err(|e| IndexerError::Git(format!("failed to spawn git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IndexerError::Git(stderr.trim().to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_source_fingerprint_and_scan() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("a.py"), "x = 1").unwrap();

        let source = LocalSource::new(temp_dir.path(), Scanner::new()).unwrap();
        let canonical = temp_dir.path().canonicalize().unwrap();
        assert_eq!(source.fingerprint(), format!("local:{}", canonical.display()));

        let set = source.scan().await.unwrap();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_local_source_missing_root() {
        let temp_dir = tempdir().unwrap();
        let result = LocalSource::new(&temp_dir.path().join("nope"), Scanner::new());
        assert!(matches!(result, Err(IndexerError::SourceUnreachable { .. })));
    }

    #[tokio::test]
    async fn test_local_source_root_removed_after_creation() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path().join("repo");
        fs::create_dir_all(&root).unwrap();

        let source = LocalSource::new(&root, Scanner::new()).unwrap();
        fs::remove_dir_all(&root).unwrap();

        let result = source.scan().await;
        assert!(matches!(result, Err(IndexerError::SourceUnreachable { .. })));
    }

    #[test]
    fn test_remote_source_validates_repo() {
        let dir = PathBuf::from("/tmp/snap");
        assert!(RemoteSource::new("acme/widgets", "main", dir.clone(), Scanner::new()).is_ok());
        assert!(RemoteSource::new("acme", "main", dir.clone(), Scanner::new()).is_err());
        assert!(RemoteSource::new("a/b/c", "main", dir.clone(), Scanner::new()).is_err());
        assert!(RemoteSource::new("acme/widgets", "", dir, Scanner::new()).is_err());
    }

    #[test]
    fn test_remote_fingerprint_includes_ref() {
        let dir = PathBuf::from("/tmp/snap");
        let main = RemoteSource::new("acme/widgets", "main", dir.clone(), Scanner::new()).unwrap();
        let dev = RemoteSource::new("acme/widgets", "dev", dir, Scanner::new()).unwrap();
        assert_eq!(main.fingerprint(), "github:acme/widgets@main");
        assert_ne!(main.fingerprint(), dev.fingerprint());
    }

    #[tokio::test]
    async fn test_remote_source_unreachable_after_retries() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("no-such-host");
        let source = RemoteSource::new(
            "acme/widgets",
            "main",
            temp_dir.path().join("snapshot"),
            Scanner::new(),
        )
        .unwrap()
        .with_base_url(&format!("file://{}", missing.display()))
        .with_retry(2, Duration::from_millis(1));

        let result = source.scan().await;
        assert!(matches!(result, Err(IndexerError::SourceUnreachable { .. })));
        assert!(!temp_dir.path().join("snapshot").exists());
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args([
                "-c",
                "user.name=ragsync",
                "-c",
                "user.email=ragsync@localhost",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_fetch_url_carries_no_credentials() {
        let source = RemoteSource::new(
            "acme/widgets",
            "main",
            PathBuf::from("/tmp/snap"),
            Scanner::new(),
        )
        .unwrap();
        assert_eq!(source.fetch_url(), "https://github.com/acme/widgets.git");

        let mirror = source.with_base_url("file:///srv/git/");
        assert_eq!(mirror.fetch_url(), "file:///srv/git/acme/widgets.git");
        assert!(mirror.token().is_none());
    }

    #[tokio::test]
    async fn test_credential_helper_answers_with_token() {
        if !git_available() {
            return;
        }

        let mut child = git_command(&["credential", "fill"], Some("s3cret"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stdin = child.stdin.take().unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stdin, b"protocol=https\nhost=github.com\n\n")
            .await
            .unwrap();
        drop(stdin);

        let output = child.wait_with_output().await.unwrap();
        let answer = String::from_utf8_lossy(&output.stdout);
        assert!(answer.contains("username=x-access-token"));
        assert!(answer.contains("password=s3cret"));
    }

    #[tokio::test]
    async fn test_remote_snapshot_fetch_and_refresh() {
        if !git_available() {
            return;
        }

        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("remotes");
        let upstream = base.join("acme/widgets.git");
        fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "--quiet"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(upstream.join("a.py"), "a = 1\n").unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "--quiet", "-m", "first"]);

        let snapshot = temp_dir.path().join("index/source");
        let source = RemoteSource::new("acme/widgets", "main", snapshot.clone(), Scanner::new())
            .unwrap()
            .with_base_url(&format!("file://{}", base.display()))
            .with_retry(1, Duration::from_millis(1));

        let set = source.scan().await.unwrap();
        assert!(set.get("a.py").is_some());
        assert!(!snapshot.with_extension("staging").exists());

        let config = fs::read_to_string(snapshot.join(".git/config")).unwrap();
        assert!(!config.contains("[remote"));
        assert!(!config.contains("widgets"));

        fs::write(upstream.join("b.py"), "b = 2\n").unwrap();
        git(&upstream, &["add", "."]);
        git(&upstream, &["commit", "--quiet", "-m", "second"]);

        let set = source.scan().await.unwrap();
        assert!(set.get("a.py").is_some());
        assert!(set.get("b.py").is_some());
    }
}
