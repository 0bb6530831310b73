//! Profiles and embedding specs.
//!
//! A profile is assembled from YAML layers, later layers overriding earlier
//! ones key by key:
//! 1. built-in defaults
//! 2. `~/.ragsync/profiles/<name>.yaml`
//! 3. the project-local `.ragsync.yaml`
//! 4. command line overrides ([`ProfileOverrides`])

use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the project-local config file.
pub const LOCAL_CONFIG_FILE: &str = ".ragsync.yaml";

/// Index settings for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_name")]
    pub name: String,

    /// GitHub `owner/repo`
    #[serde(default)]
    pub repo: Option<String>,

    /// Git ref/branch/tag for `repo`
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,

    /// Local source directory; takes precedence over `repo`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Top-level directories to index (root-level files always qualify)
    #[serde(default = "default_include")]
    pub include: Vec<String>,

    /// File suffixes to index
    #[serde(default = "default_ext")]
    pub ext: Vec<String>,

    /// Index location (default: `~/.ragsync/indexes/<name>`)
    #[serde(default)]
    pub persist: Option<PathBuf>,

    /// `<backend>:<model>`
    #[serde(default = "default_embed")]
    pub embed: String,

    /// Vector dimension when the model is not a known one
    #[serde(default)]
    pub embed_dim: Option<usize>,

    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Files processed concurrently
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,

    /// Quiet period before a watch-mode rebuild
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: f64,
}

fn default_name() -> String {
    "default".to_string()
}

fn default_ref() -> String {
    "master".to_string()
}

fn default_include() -> Vec<String> {
    ["src", "docs", "examples", "tests"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ext() -> Vec<String> {
    [".py", ".md", ".rst", ".txt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_embed() -> String {
    "openai:text-embedding-3-large".to_string()
}

fn default_chunk_lines() -> usize {
    80
}

fn default_chunk_overlap() -> usize {
    20
}

fn default_parallel() -> usize {
    8
}

fn default_max_file_size_kb() -> u64 {
    1024
}

fn default_debounce_secs() -> f64 {
    2.0
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: default_name(),
            repo: None,
            git_ref: default_ref(),
            path: None,
            include: default_include(),
            ext: default_ext(),
            persist: None,
            embed: default_embed(),
            embed_dim: None,
            chunk_lines: default_chunk_lines(),
            chunk_overlap: default_chunk_overlap(),
            parallel: default_parallel(),
            max_file_size_kb: default_max_file_size_kb(),
            debounce_secs: default_debounce_secs(),
        }
    }
}

impl Profile {
    /// Resolved index location.
    pub fn persist_dir(&self) -> PathBuf {
        match &self.persist {
            Some(dir) => expand_home(dir),
            None => ragsync_home().join("indexes").join(&self.name),
        }
    }

    /// Resolved local source directory, if any.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(expand_home)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_kb * 1024
    }

    /// Quiet period for watch mode; must be a finite, non-negative number of seconds.
    pub fn debounce(&self) -> Result<Duration, CoreError> {
        Duration::try_from_secs_f64(self.debounce_secs).map_err(|_| {
            CoreError::Config(format!(
                "debounce must be a non-negative number of seconds, got {}",
                self.debounce_secs
            ))
        })
    }

    pub fn embed_spec(&self) -> Result<EmbedSpec, CoreError> {
        EmbedSpec::parse(&self.embed, self.embed_dim)
    }
}

/// Command line values that override a loaded profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub path: Option<PathBuf>,
    pub repo: Option<String>,
    pub git_ref: Option<String>,
    pub persist: Option<PathBuf>,
    pub debounce_secs: Option<f64>,
}

impl ProfileOverrides {
    pub fn apply(self, mut profile: Profile) -> Profile {
        if let Some(path) = self.path {
            profile.path = Some(path);
        }
        if let Some(repo) = self.repo {
            profile.repo = Some(repo);
        }
        if let Some(git_ref) = self.git_ref {
            profile.git_ref = git_ref;
        }
        if let Some(persist) = self.persist {
            profile.persist = Some(persist);
        }
        if let Some(debounce) = self.debounce_secs {
            profile.debounce_secs = debounce;
        }
        profile
    }
}

/// Resolves profiles from their YAML layers.
#[derive(Debug, Clone)]
pub struct ProfileLoader {
    profiles_dir: PathBuf,
}

impl ProfileLoader {
    /// Loader reading user profiles from `~/.ragsync/profiles`.
    pub fn new() -> Self {
        Self {
            profiles_dir: ragsync_home().join("profiles"),
        }
    }

    pub fn with_profiles_dir(profiles_dir: PathBuf) -> Self {
        Self { profiles_dir }
    }

    /// Load profile `name` (or `default`), merged with `local_config` if it exists.
    pub fn load(&self, name: Option<&str>, local_config: Option<&Path>) -> Result<Profile, CoreError> {
        let name = name.unwrap_or("default");
        let mut merged = Mapping::new();

        let user_profile = self.profiles_dir.join(format!("{}.yaml", name));
        merge_layer(&mut merged, &user_profile)?;

        if let Some(local) = local_config {
            merge_layer(&mut merged, local)?;
        }

        let name_key = Value::String("name".to_string());
        if !merged.contains_key(&name_key) {
            merged.insert(name_key, Value::String(name.to_string()));
        }

        let profile: Profile = serde_yaml::from_value(Value::Mapping(merged))
            .map_err(|e| CoreError::Config(format!("invalid profile '{}': {}", name, e)))?;

        debug!(profile = %profile.name, persist = ?profile.persist_dir(), "Loaded profile");

        Ok(profile)
    }
}

impl Default for ProfileLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay the top-level keys of the YAML file at `path`, if it exists.
fn merge_layer(merged: &mut Mapping, path: &Path) -> Result<(), CoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    match serde_yaml::from_str::<Value>(&content)? {
        Value::Mapping(layer) => {
            debug!(path = ?path, keys = layer.len(), "Merging profile layer");
            for (key, value) in layer {
                merged.insert(key, value);
            }
            Ok(())
        }
        Value::Null => Ok(()),
        _ => Err(CoreError::Config(format!(
            "{} must contain a mapping",
            path.display()
        ))),
    }
}

/// `~/.ragsync`
pub fn ragsync_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragsync")
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedBackend {
    OpenAi,
    Local,
    Ollama,
}

impl EmbedBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedBackend::OpenAi => "openai",
            EmbedBackend::Local => "local",
            EmbedBackend::Ollama => "ollama",
        }
    }
}

/// Vector sizes of models that need no `embed_dim`.
const KNOWN_DIMENSIONS: &[(&str, usize)] = &[
    ("text-embedding-3-large", 3072),
    ("text-embedding-3-small", 1536),
    ("text-embedding-ada-002", 1536),
    ("nomic-embed-text", 768),
    ("bge-base-en-v1.5", 768),
    ("bge-small-en-v1.5", 384),
    ("bge-large-en-v1.5", 1024),
    ("all-minilm", 384),
    ("mxbai-embed-large", 1024),
];

/// A parsed `<backend>:<model>` embedding spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedSpec {
    pub backend: EmbedBackend,
    pub model: String,
    pub dimension: usize,
}

impl EmbedSpec {
    /// Parse `spec`; `dimension` overrides the known-model table.
    pub fn parse(spec: &str, dimension: Option<usize>) -> Result<Self, CoreError> {
        let (backend, model) = spec
            .split_once(':')
            .ok_or_else(|| CoreError::Config(format!("embed spec '{}' is not <backend>:<model>", spec)))?;

        let backend = match backend.trim() {
            "openai" => EmbedBackend::OpenAi,
            "local" => EmbedBackend::Local,
            "ollama" => EmbedBackend::Ollama,
            other => {
                return Err(CoreError::Config(format!(
                    "unknown embedding backend '{}'",
                    other
                )))
            }
        };

        let model = model.trim();
        if model.is_empty() {
            return Err(CoreError::Config(format!("embed spec '{}' has no model", spec)));
        }

        let dimension = dimension
            .or_else(|| {
                KNOWN_DIMENSIONS
                    .iter()
                    .find(|(known, _)| *known == model)
                    .map(|(_, dim)| *dim)
            })
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "unknown dimension for model '{}', set embed_dim",
                    model
                ))
            })?;

        if dimension == 0 {
            return Err(CoreError::Config("embed_dim must be positive".to_string()));
        }

        Ok(Self {
            backend,
            model: model.to_string(),
            dimension,
        })
    }

    /// `<backend>:<model>#<dimension>`
    pub fn fingerprint(&self) -> String {
        format!("{}:{}#{}", self.backend.as_str(), self.model, self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_profile() {
        let profile = Profile::default();
        assert_eq!(profile.git_ref, "master");
        assert_eq!(profile.include, vec!["src", "docs", "examples", "tests"]);
        assert_eq!(profile.ext, vec![".py", ".md", ".rst", ".txt"]);
        assert_eq!(profile.chunk_lines, 80);
        assert_eq!(profile.chunk_overlap, 20);
        assert_eq!(profile.parallel, 8);
        assert_eq!(profile.max_file_size(), 1024 * 1024);
        assert_eq!(profile.debounce().unwrap(), Duration::from_secs(2));
        assert!(profile.persist_dir().ends_with(".ragsync/indexes/default"));
    }

    #[test]
    fn test_debounce_rejects_unusable_values() {
        let mut profile = Profile::default();
        for bad in [f64::INFINITY, f64::NAN, -1.0, 1e300] {
            profile.debounce_secs = bad;
            assert!(matches!(profile.debounce(), Err(CoreError::Config(_))));
        }

        profile.debounce_secs = 0.0;
        assert_eq!(profile.debounce().unwrap(), Duration::ZERO);
        profile.debounce_secs = 0.25;
        assert_eq!(profile.debounce().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_profile_yaml_uses_ref_key() {
        let profile: Profile = serde_yaml::from_str("repo: nanograv/PINT\nref: v1.0\n").unwrap();
        assert_eq!(profile.repo.as_deref(), Some("nanograv/PINT"));
        assert_eq!(profile.git_ref, "v1.0");
        assert_eq!(profile.chunk_lines, 80);
    }

    #[test]
    fn test_layers_override_key_by_key() {
        let temp_dir = tempdir().unwrap();
        let profiles = temp_dir.path().join("profiles");
        std::fs::create_dir_all(&profiles).unwrap();
        std::fs::write(
            profiles.join("pint.yaml"),
            "repo: nanograv/PINT\nparallel: 4\next: [.py]\n",
        )
        .unwrap();
        let local = temp_dir.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(&local, "parallel: 2\nembed_dim: 256\n").unwrap();

        let profile = ProfileLoader::with_profiles_dir(profiles)
            .load(Some("pint"), Some(&local))
            .unwrap();

        assert_eq!(profile.name, "pint");
        assert_eq!(profile.repo.as_deref(), Some("nanograv/PINT"));
        assert_eq!(profile.parallel, 2);
        assert_eq!(profile.ext, vec![".py"]);
        assert_eq!(profile.embed_dim, Some(256));
        assert!(profile.persist_dir().ends_with("indexes/pint"));
    }

    #[test]
    fn test_missing_layers_yield_defaults() {
        let temp_dir = tempdir().unwrap();
        let profile = ProfileLoader::with_profiles_dir(temp_dir.path().to_path_buf())
            .load(None, Some(&temp_dir.path().join("absent.yaml")))
            .unwrap();
        assert_eq!(profile, Profile::default());
    }

    #[test]
    fn test_invalid_layer_is_config_error() {
        let temp_dir = tempdir().unwrap();
        let local = temp_dir.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(&local, "- just\n- a list\n").unwrap();

        let result = ProfileLoader::with_profiles_dir(temp_dir.path().to_path_buf())
            .load(None, Some(&local));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let profile = ProfileOverrides {
            path: Some(PathBuf::from("/src/repo")),
            git_ref: Some("main".to_string()),
            persist: Some(PathBuf::from("/tmp/idx")),
            ..Default::default()
        }
        .apply(Profile::default());

        assert_eq!(profile.local_path(), Some(PathBuf::from("/src/repo")));
        assert_eq!(profile.git_ref, "main");
        assert_eq!(profile.persist_dir(), PathBuf::from("/tmp/idx"));
    }

    #[test]
    fn test_embed_spec_known_model() {
        let spec = EmbedSpec::parse("openai:text-embedding-3-large", None).unwrap();
        assert_eq!(spec.backend, EmbedBackend::OpenAi);
        assert_eq!(spec.dimension, 3072);
        assert_eq!(spec.fingerprint(), "openai:text-embedding-3-large#3072");

        let spec = EmbedSpec::parse("ollama:nomic-embed-text", None).unwrap();
        assert_eq!(spec.fingerprint(), "ollama:nomic-embed-text#768");
    }

    #[test]
    fn test_embed_spec_dimension_override() {
        let spec = EmbedSpec::parse("local:my-model", Some(512)).unwrap();
        assert_eq!(spec.fingerprint(), "local:my-model#512");
    }

    #[test]
    fn test_embed_spec_errors() {
        assert!(matches!(
            EmbedSpec::parse("text-embedding-3-large", None),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            EmbedSpec::parse("cohere:embed-v3", None),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            EmbedSpec::parse("local:mystery", None),
            Err(CoreError::Config(_))
        ));
        assert!(matches!(
            EmbedSpec::parse("openai:", None),
            Err(CoreError::Config(_))
        ));
    }
}
