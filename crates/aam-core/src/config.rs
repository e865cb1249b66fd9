//! Explicit configuration threaded into every resolver and engine call.
//!
//! Nothing in `aam-core` reads process-wide defaults on its own: callers
//! build a [`Config`] (usually via [`Config::load`]) and pass it down.
//!
//! ```text
//! ~/.aam/                  # AAM home ($AAM_HOME overrides)
//! ├── config.yaml          # global registries, sources, platforms
//! └── sources/             # shared git cache, one clone per source
//!     └── state.yaml       # last-synced revision per source
//!
//! <project>/
//! ├── aam-lock.yaml        # lock file
//! └── .aam/
//!     ├── config.yaml      # project overrides
//!     ├── packages/        # unpacked installed packages
//!     └── tmp/
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use aam_schema::{LOCK_FILE, Platform};
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// Name of the configuration file in both the home and project state dirs.
pub const CONFIG_FILE: &str = "config.yaml";

/// Project-local state directory name.
pub const STATE_DIR: &str = ".aam";

/// Returns the AAM home directory, or None if the user's home cannot be resolved.
pub fn try_aam_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("AAM_HOME") {
        return Some(PathBuf::from(val));
    }
    dirs::home_dir().map(|h| h.join(".aam"))
}

/// A local file-based registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    pub path: PathBuf,
}

/// A git-backed artifact source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Branch or tag to track.
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    /// Subdirectory of the repository to scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_ref() -> String {
    "main".to_string()
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            git_ref: default_ref(),
            path: None,
        }
    }
}

/// Bounded exponential backoff applied to every network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub factor: u32,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 250,
            factor: 2,
            timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = u64::from(self.factor.max(1)).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// On-disk shape of `config.yaml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    registries: Vec<RegistryConfig>,
    sources: Vec<SourceConfig>,
    platforms: Vec<Platform>,
    concurrency: Option<usize>,
    retry: Option<RetryPolicy>,
}

/// Resolved configuration for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub project_root: PathBuf,
    pub home: PathBuf,
    /// Registries in lookup order.
    pub registries: Vec<RegistryConfig>,
    /// Sources in lookup order.
    pub sources: Vec<SourceConfig>,
    /// Platforms artifacts are deployed to when a manifest does not say.
    pub platforms: Vec<Platform>,
    /// Size of the fetch/verify/deploy worker pool.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Config {
    /// Configuration with defaults and no registries or sources.
    pub fn new(project_root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
            .min(8);
        Self {
            project_root: project_root.into(),
            home: home.into(),
            registries: Vec::new(),
            sources: Vec::new(),
            platforms: vec![Platform::Claude],
            concurrency,
            retry: RetryPolicy::default(),
        }
    }

    /// Load `<home>/config.yaml`, then overlay `<project>/.aam/config.yaml`.
    ///
    /// Missing files leave defaults in place.
    pub fn load(project_root: impl Into<PathBuf>) -> Result<Self> {
        let home = try_aam_home().ok_or_else(|| {
            Error::Other("Could not determine home directory. Set AAM_HOME to override.".into())
        })?;
        Self::load_with_home(project_root, home)
    }

    /// Same as [`Config::load`] with an explicit home directory.
    pub fn load_with_home(
        project_root: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut config = Self::new(project_root, home);
        let global = config.home.join(CONFIG_FILE);
        let project = config.state_dir().join(CONFIG_FILE);
        for path in [global, project] {
            if let Some(file) = read_config_file(&path)? {
                config.overlay(file);
            }
        }
        tracing::debug!(
            registries = config.registries.len(),
            sources = config.sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn overlay(&mut self, file: ConfigFile) {
        for registry in file.registries {
            self.registries.retain(|r| r.name != registry.name);
            self.registries.push(registry);
        }
        for source in file.sources {
            self.sources.retain(|s| s.name != source.name);
            self.sources.push(source);
        }
        if !file.platforms.is_empty() {
            self.platforms = file.platforms;
        }
        if let Some(concurrency) = file.concurrency {
            self.concurrency = concurrency.max(1);
        }
        if let Some(retry) = file.retry {
            self.retry = retry;
        }
    }

    pub fn with_registry(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        self.registries.retain(|r| r.name != name);
        self.registries.push(RegistryConfig {
            name,
            path: path.into(),
        });
        self
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.retain(|s| s.name != source.name);
        self.sources.push(source);
        self
    }

    pub fn with_platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = platforms.into_iter().collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn registry(&self, name: &str) -> Option<&RegistryConfig> {
        self.registries.iter().find(|r| r.name == name)
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Project-local state root: `<project>/.aam`
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Installed package root: `<project>/.aam/packages`
    pub fn packages_dir(&self) -> PathBuf {
        self.state_dir().join("packages")
    }

    /// Temp path: `<project>/.aam/tmp` (same volume as the package root)
    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    /// Lock file: `<project>/aam-lock.yaml`
    pub fn lock_path(&self) -> PathBuf {
        self.project_root.join(LOCK_FILE)
    }

    /// Shared git cache: `<home>/sources`
    pub fn sources_dir(&self) -> PathBuf {
        self.home.join("sources")
    }
}

fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).at(path)?;
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| Error::Yaml {
            path: path.to_path_buf(),
            source,
        })
}
