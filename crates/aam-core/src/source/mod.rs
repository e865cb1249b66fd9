//! Source store: git-backed artifact sources.
//!
//! Each configured source is cloned once into `<home>/sources/<name>` and
//! refreshed with fetch + hard reset. The last synced revision per source is
//! kept in `<home>/sources/state.yaml`. Syncs of different sources may run
//! concurrently; syncs of the same source are serialized.

mod git;
pub mod scan;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aam_schema::{PackageName, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Config, RetryPolicy, SourceConfig};
use crate::error::{Error, IoResultExt, Result};
use crate::lock::{FileLock, write_atomic};
use crate::manifest::{ArtifactDecl, Manifest, ScaffoldOptions};
use crate::package::PackageArchive;
use crate::retry::with_retry;

pub use scan::{Candidate, classify, detect, scan_tree};

const STATE_FILE: &str = "state.yaml";

/// Version given to packages built from source artifacts, which carry no
/// manifest of their own.
pub const SOURCE_VERSION: Version = Version::new(0, 0, 0);

/// Last-synced state of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub revision: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    sources: BTreeMap<String, SourceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub previous: Option<String>,
    pub revision: String,
    /// True when this sync performed the initial clone.
    pub cloned: bool,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.revision.as_str())
    }
}

/// Artifact-level changes between two revisions of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDiff {
    pub source: String,
    pub since: String,
    pub revision: String,
    pub added: Vec<Candidate>,
    pub removed: Vec<Candidate>,
    pub changed: Vec<Candidate>,
}

/// Package name of a source artifact: `@<source>/<artifact>`.
pub fn package_name(source: &str, candidate: &Candidate) -> Result<PackageName> {
    PackageName::parse(&format!("@{source}/{}", candidate.name)).map_err(|e| {
        Error::SourceUnavailable {
            name: source.to_string(),
            reason: e.to_string(),
        }
    })
}

#[derive(Debug)]
pub struct SourceStore {
    root: PathBuf,
    retry: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceStore {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.sources_dir(),
            retry: config.retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Local clone of a source.
    pub fn checkout_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn scan_root(&self, source: &SourceConfig) -> PathBuf {
        let dir = self.checkout_dir(&source.name);
        match &source.path {
            Some(sub) => dir.join(sub),
            None => dir,
        }
    }

    fn source_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    pub fn is_cloned(&self, name: &str) -> bool {
        self.checkout_dir(name).join(".git").exists()
    }

    /// Clone or refresh a source and record its new revision.
    pub async fn sync(&self, source: &SourceConfig) -> Result<SyncReport> {
        let lock = self.source_lock(&source.name);
        let _guard = lock.lock().await;

        let dir = self.checkout_dir(&source.name);
        let cloned = !self.is_cloned(&source.name);
        let subject = format!("sync {}", source.name);

        with_retry(&self.retry, &subject, |_, _| {}, || async {
            if self.is_cloned(&source.name) {
                git::run_git(&["fetch", "--quiet", "origin", &source.git_ref], Some(&dir)).await?;
                git::run_git(&["reset", "--hard", "--quiet", "FETCH_HEAD"], Some(&dir)).await?;
            } else {
                if dir.exists() {
                    fs::remove_dir_all(&dir).at(&dir)?;
                }
                fs::create_dir_all(&self.root).at(&self.root)?;
                let target = dir.to_string_lossy().into_owned();
                git::run_git(
                    &[
                        "clone",
                        "--quiet",
                        "--branch",
                        &source.git_ref,
                        &source.url,
                        target.as_str(),
                    ],
                    None,
                )
                .await?;
            }
            Ok(())
        })
        .await
        .map_err(|e| unavailable(&source.name, e))?;

        let revision = git::rev_parse(&dir, "HEAD")
            .await
            .map_err(|e| unavailable(&source.name, e))?;
        let previous = self.update_state(source, &revision)?;

        tracing::info!(
            source = %source.name,
            revision = %revision,
            previous = previous.as_deref().unwrap_or("-"),
            cloned,
            "Synced source"
        );
        Ok(SyncReport {
            source: source.name.clone(),
            previous,
            revision,
            cloned,
        })
    }

    /// Candidates in the current working tree.
    pub fn scan(&self, source: &SourceConfig) -> Result<Vec<Candidate>> {
        self.require_clone(&source.name)?;
        let root = self.scan_root(source);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        scan_tree(&root)
    }

    /// Artifact changes between `since` and the current `HEAD`.
    pub async fn diff(&self, source: &SourceConfig, since: &str) -> Result<SourceDiff> {
        let dir = self.require_clone(&source.name)?;
        let subdir = source.path.as_ref().map(|p| crate::package::archive_path(p));
        let subdir = subdir.as_deref();

        let since = git::rev_parse(&dir, since).await?;
        let head = git::rev_parse(&dir, "HEAD").await?;

        let old: BTreeSet<Candidate> =
            detect(strip_subdir(git::ls_tree(&dir, &since, subdir).await?, subdir))
                .into_iter()
                .collect();
        let new: BTreeSet<Candidate> =
            detect(strip_subdir(git::ls_tree(&dir, &head, subdir).await?, subdir))
                .into_iter()
                .collect();
        let touched = strip_subdir(
            git::changed_paths(&dir, &since, &head, subdir).await?,
            subdir,
        );

        let changed = new
            .intersection(&old)
            .filter(|c| {
                touched
                    .iter()
                    .any(|p| *p == c.path || p.starts_with(&format!("{}/", c.path)))
            })
            .cloned()
            .collect();

        Ok(SourceDiff {
            source: source.name.clone(),
            since,
            revision: head,
            added: new.difference(&old).cloned().collect(),
            removed: old.difference(&new).cloned().collect(),
            changed,
        })
    }

    /// Build a package archive for `candidate` as it exists at `revision`.
    ///
    /// Reads content with `git archive`, so the working tree is not touched.
    /// The synthesized manifest names the package `@<source>/<artifact>`.
    pub async fn pack(
        &self,
        source: &SourceConfig,
        candidate: &Candidate,
        revision: &str,
    ) -> Result<PackageArchive> {
        let lock = self.source_lock(&source.name);
        let _guard = lock.lock().await;
        let dir = self.require_clone(&source.name)?;

        let repo_path = match &source.path {
            Some(sub) => format!("{}/{}", crate::package::archive_path(sub), candidate.path),
            None => candidate.path.clone(),
        };
        let tar_bytes = git::run_git_bytes(
            &["archive", "--format=tar", revision, &repo_path],
            Some(&dir),
        )
        .await
        .map_err(|e| unavailable(&source.name, e))?;

        let name = package_name(&source.name, candidate)?;
        let candidate = candidate.clone();
        tokio::task::spawn_blocking(move || stage_and_pack(&tar_bytes, &repo_path, &name, &candidate))
            .await
            .map_err(|e| Error::Other(format!("pack task failed: {e}")))?
    }

    /// Revision recorded by the last successful sync.
    pub fn last_revision(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .read_state()?
            .sources
            .get(name)
            .map(|s| s.revision.clone()))
    }

    pub fn state(&self, name: &str) -> Result<Option<SourceState>> {
        Ok(self.read_state()?.sources.get(name).cloned())
    }

    fn require_clone(&self, name: &str) -> Result<PathBuf> {
        if self.is_cloned(name) {
            Ok(self.checkout_dir(name))
        } else {
            Err(Error::SourceUnavailable {
                name: name.to_string(),
                reason: "not synced yet".into(),
            })
        }
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn read_state(&self) -> Result<StateFile> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(StateFile::default());
        }
        let content = fs::read_to_string(&path).at(&path)?;
        serde_yaml::from_str(&content).map_err(|source| Error::Yaml { path, source })
    }

    fn update_state(&self, source: &SourceConfig, revision: &str) -> Result<Option<String>> {
        let _guard = FileLock::acquire(&self.root.join(format!("{STATE_FILE}.lock")))?;
        let mut state = self.read_state()?;
        let previous = state.sources.insert(
            source.name.clone(),
            SourceState {
                url: source.url.clone(),
                git_ref: source.git_ref.clone(),
                revision: revision.to_string(),
                synced_at: Utc::now(),
            },
        );
        let path = self.state_path();
        let content = serde_yaml::to_string(&state).map_err(|e| Error::Yaml {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, content.as_bytes())?;
        Ok(previous.map(|p| p.revision))
    }
}

fn unavailable(name: &str, err: Error) -> Error {
    match err {
        Error::Git { .. } | Error::Io { .. } => Error::SourceUnavailable {
            name: name.to_string(),
            reason: err.to_string(),
        },
        other => other,
    }
}

fn strip_subdir(paths: Vec<String>, subdir: Option<&str>) -> Vec<String> {
    match subdir {
        Some(sub) => {
            let prefix = format!("{}/", sub.trim_end_matches('/'));
            paths
                .into_iter()
                .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
                .collect()
        }
        None => paths,
    }
}

/// Unpack `git archive` output and re-pack it as a single-artifact package.
fn stage_and_pack(
    tar_bytes: &[u8],
    repo_path: &str,
    name: &PackageName,
    candidate: &Candidate,
) -> Result<PackageArchive> {
    let staging = tempfile::tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?;
    let raw = staging.path().join("raw");
    tar::Archive::new(tar_bytes)
        .unpack(&raw)
        .map_err(|e| Error::Archive(format!("git archive output: {e}")))?;

    let file_name = Path::new(&candidate.path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| candidate.name.clone());
    let dest_rel = format!("{}/{file_name}", candidate.kind.dir_name());

    let pkg = staging.path().join("pkg");
    let dest = pkg.join(&dest_rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let src = raw.join(repo_path);
    fs::rename(&src, &dest).at(&src)?;

    let mut options = ScaffoldOptions::new(name.clone());
    options.version = Some(SOURCE_VERSION);
    options.artifacts = vec![ArtifactDecl::new(candidate.kind, dest_rel)];
    Manifest::scaffold(options).write(&pkg)?;

    PackageArchive::pack(&pkg).map(|(_, archive)| archive)
}
