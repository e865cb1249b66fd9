//! Lock file (`aam-lock.yaml`) and drift detection.
//!
//! The lock file is the only record of what is actually on disk. Writers
//! hold an exclusive advisory lock on `aam-lock.yaml.lock` and replace the
//! file atomically; readers never take the lock and retry if they catch a
//! file they cannot parse.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aam_schema::{Constraint, PackageName, Platform, Sha256Digest, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{FileLock, write_atomic};
use crate::resolver::{Catalog, DependencyGraph, Pin, Provenance, ResolvedPackage};

pub const LOCKFILE_VERSION: u32 = 1;

const READ_ATTEMPTS: u32 = 3;
const READ_BACKOFF: Duration = Duration::from_millis(50);

/// A file written on behalf of a package, with its checksum at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
    /// Project-relative, `/`-separated.
    pub path: String,
    pub sha256: Sha256Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: Version,
    pub provenance: Provenance,
    pub digest: Sha256Digest,
    pub constraint: Constraint,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PackageName, Constraint>,
    #[serde(default)]
    pub files: Vec<InstalledFile>,
}

impl LockEntry {
    pub fn pin(&self) -> Pin {
        Pin {
            version: self.version.clone(),
            provenance: self.provenance.clone(),
        }
    }

    /// Same version from the same origin (and revision, for sources).
    pub fn matches(&self, pkg: &ResolvedPackage) -> bool {
        self.version == pkg.version && self.provenance == pkg.provenance
    }

    /// Installed files whose current checksum differs from the recorded one.
    /// Missing files count as modified.
    pub fn modified_files(&self, project_root: &Path) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| {
                Sha256Digest::compute_file(&project_root.join(&f.path))
                    .map_or(true, |actual| actual != f.sha256)
            })
            .map(|f| f.path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub lockfile_version: u32,
    /// Root constraints of the project.
    #[serde(default)]
    pub dependencies: BTreeMap<PackageName, Constraint>,
    #[serde(default)]
    pub packages: BTreeMap<PackageName, LockEntry>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION,
            dependencies: BTreeMap::new(),
            packages: BTreeMap::new(),
        }
    }
}

impl LockFile {
    pub fn get(&self, name: &PackageName) -> Option<&LockEntry> {
        self.packages.get(name)
    }

    /// Locked versions, for use as resolver preferences.
    pub fn preferences(&self) -> BTreeMap<PackageName, Pin> {
        self.packages
            .iter()
            .map(|(name, entry)| (name.clone(), entry.pin()))
            .collect()
    }

    /// Installed packages that declare a dependency on `name`.
    pub fn dependents_of(&self, name: &PackageName) -> Vec<PackageName> {
        self.packages
            .iter()
            .filter(|(other, entry)| *other != name && entry.dependencies.contains_key(name))
            .map(|(other, _)| other.clone())
            .collect()
    }

    /// Record a package that finished deploying.
    pub fn record(&mut self, pkg: &ResolvedPackage, digest: Sha256Digest, files: Vec<InstalledFile>) {
        self.packages.insert(
            pkg.name.clone(),
            LockEntry {
                version: pkg.version.clone(),
                provenance: pkg.provenance.clone(),
                digest,
                constraint: pkg.constraint.clone(),
                installed_at: Utc::now(),
                dependencies: pkg.dependencies.clone(),
                files,
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upgrade {
    pub from: Pin,
    pub to: ResolvedPackage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub name: PackageName,
    pub entry: LockEntry,
}

/// What it takes to move from the current lock to a new graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockDiff {
    pub to_install: Vec<ResolvedPackage>,
    pub to_upgrade: Vec<Upgrade>,
    pub to_remove: Vec<Removal>,
    pub unchanged: Vec<PackageName>,
}

impl LockDiff {
    /// Nothing to install, upgrade or remove.
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_upgrade.is_empty() && self.to_remove.is_empty()
    }
}

/// Compare the current lock with a freshly resolved graph.
pub fn diff(current: &LockFile, graph: &DependencyGraph) -> LockDiff {
    let mut out = LockDiff::default();
    for (name, pkg) in &graph.packages {
        match current.get(name) {
            None => out.to_install.push(pkg.clone()),
            Some(entry) if entry.matches(pkg) => out.unchanged.push(name.clone()),
            Some(entry) => out.to_upgrade.push(Upgrade {
                from: entry.pin(),
                to: pkg.clone(),
            }),
        }
    }
    for (name, entry) in &current.packages {
        if !graph.packages.contains_key(name) {
            out.to_remove.push(Removal {
                name: name.clone(),
                entry: entry.clone(),
            });
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outdated {
    pub name: PackageName,
    pub current: Version,
    pub latest: Version,
    /// Set for source packages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Modified {
    pub name: PackageName,
    pub files: Vec<String>,
}

/// Drift between the lock file, the catalogs and the files on disk.
///
/// `outdated`, `up_to_date` and `no_source` partition the locked packages;
/// `locally_modified` is reported independently of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub outdated: Vec<Outdated>,
    pub up_to_date: Vec<PackageName>,
    pub no_source: Vec<PackageName>,
    pub locally_modified: Vec<Modified>,
}

/// Check every locked package against its origin and its files on disk.
pub fn check_drift(lock: &LockFile, catalog: &dyn Catalog, project_root: &Path) -> DriftReport {
    let mut report = DriftReport::default();

    for (name, entry) in &lock.packages {
        let offered: Vec<_> = catalog
            .lookup(name)
            .into_iter()
            .filter(|c| c.provenance.origin() == entry.provenance.origin())
            .collect();

        if offered.is_empty() {
            report.no_source.push(name.clone());
        } else {
            // Sources list their current revision first.
            let newest = if entry.provenance.is_source() {
                offered.iter().find(|c| c.satisfies(&entry.constraint))
            } else {
                offered
                    .iter()
                    .filter(|c| c.satisfies(&entry.constraint))
                    .max_by(|a, b| a.version.cmp(&b.version))
            };
            let newer = newest.filter(|c| match (&c.provenance, &entry.provenance) {
                (Provenance::Source { revision: new, .. }, Provenance::Source { revision: old, .. }) => {
                    new != old
                }
                _ => c.version > entry.version,
            });
            match newer {
                Some(c) => report.outdated.push(Outdated {
                    name: name.clone(),
                    current: entry.version.clone(),
                    latest: c.version.clone(),
                    current_revision: entry.provenance.revision().map(str::to_string),
                    latest_revision: c.provenance.revision().map(str::to_string),
                }),
                None => report.up_to_date.push(name.clone()),
            }
        }

        let files = entry.modified_files(project_root);
        if !files.is_empty() {
            report.locally_modified.push(Modified {
                name: name.clone(),
                files,
            });
        }
    }

    report
}

/// Reads and writes the project lock file.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.lock_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sentinel(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Read the lock file without taking the write lock. A missing file is an
    /// empty lock.
    pub fn read(&self) -> Result<LockFile> {
        let mut attempt = 1;
        loop {
            match self.read_once() {
                Ok(lock) => return Ok(lock),
                Err(err @ Error::Lockfile { .. }) if attempt < READ_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "Lock file unreadable, retrying");
                    std::thread::sleep(READ_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn read_once(&self) -> Result<LockFile> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockFile::default()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(LockFile::default());
        }
        let lock: LockFile = serde_yaml::from_str(&content).map_err(|e| Error::Lockfile {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if lock.lockfile_version > LOCKFILE_VERSION {
            return Err(Error::Lockfile {
                path: self.path.clone(),
                reason: format!(
                    "lock file version {} is newer than supported version {LOCKFILE_VERSION}",
                    lock.lockfile_version
                ),
            });
        }
        Ok(lock)
    }

    /// Read-modify-write under the exclusive lock.
    pub fn update<T>(&self, f: impl FnOnce(&mut LockFile) -> T) -> Result<(T, LockFile)> {
        let _guard = FileLock::acquire(&self.sentinel())?;
        let mut lock = self.read_once()?;
        let out = f(&mut lock);
        self.write(&lock)?;
        tracing::debug!(packages = lock.packages.len(), path = %self.path.display(), "Wrote lock file");
        Ok((out, lock))
    }

    fn write(&self, lock: &LockFile) -> Result<()> {
        let content = serde_yaml::to_string(lock).map_err(|e| Error::Lockfile {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, content.as_bytes())
    }
}
