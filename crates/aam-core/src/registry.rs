//! Local file-based registry.
//!
//! ```text
//! <registry>/
//! ├── registry.yaml                  # identity and format version
//! ├── index.yaml                     # name -> versions, digests, tags
//! ├── .publish.lock                  # held while publishing
//! └── packages/
//!     ├── review/
//!     │   ├── review-1.0.0.aam
//!     │   └── review-1.0.0.aam.sha256
//!     └── acme--lint/                # @acme/lint
//!         └── lint-0.3.0.aam
//! ```

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use aam_schema::{
    Constraint, IndexEntry, PackageName, RegistryIndex, Sha256Digest, Version, VersionInfo,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::lock::{FileLock, write_atomic};
use crate::package::PackageArchive;

pub const REGISTRY_FILE: &str = "registry.yaml";
pub const INDEX_FILE: &str = "index.yaml";
pub const PACKAGES_DIR: &str = "packages";
const PUBLISH_LOCK: &str = ".publish.lock";

/// Dist-tag that always follows the highest stable version.
pub const LATEST_TAG: &str = "latest";

/// Identity record stored in `registry.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
}

/// How to pick a version when fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Highest version satisfying the constraint.
    Constraint(Constraint),
    /// The version a dist-tag points at.
    Tag(String),
}

impl From<Constraint> for Selector {
    fn from(c: Constraint) -> Self {
        Self::Constraint(c)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Extra dist-tag to point at the published version.
    pub tag: Option<String>,
    /// Replace an existing `(name, version)` even if its digest differs.
    pub overwrite: bool,
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub name: PackageName,
    pub version: Version,
    pub digest: Sha256Digest,
    pub archive: PathBuf,
    /// Digest that was overwritten, if any.
    pub replaced: Option<Sha256Digest>,
}

/// Why a search hit matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExactName,
    Name,
    Description,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub name: PackageName,
    pub latest: Version,
    pub description: String,
    pub registry: String,
    pub matched: MatchKind,
    pub published_at: Option<DateTime<Utc>>,
}

/// A local registry directory.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    name: String,
    root: PathBuf,
}

impl LocalRegistry {
    /// Create the registry layout at `root`.
    pub fn init(root: &Path, name: &str, description: &str) -> Result<Self> {
        let meta_path = root.join(REGISTRY_FILE);
        if meta_path.exists() {
            return Err(Error::Other(format!(
                "A registry already exists at {}",
                root.display()
            )));
        }
        fs::create_dir_all(root.join(PACKAGES_DIR)).at(root)?;

        let meta = RegistryMeta {
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            format_version: aam_schema::index::INDEX_FORMAT_VERSION,
        };
        write_yaml(&meta_path, &meta)?;
        write_yaml(&root.join(INDEX_FILE), &RegistryIndex::new())?;

        tracing::info!(registry = name, path = %root.display(), "Initialized registry");
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
        })
    }

    /// Open an existing registry under the configured `name`.
    pub fn open(name: &str, root: &Path) -> Result<Self> {
        if !root.join(REGISTRY_FILE).is_file() {
            return Err(Error::RegistryUnreachable {
                name: name.to_string(),
                reason: format!("no {REGISTRY_FILE} in {}", root.display()),
            });
        }
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> Result<RegistryMeta> {
        read_yaml(&self.root.join(REGISTRY_FILE))
    }

    /// Load `index.yaml`. A missing index is an empty registry.
    pub fn index(&self) -> Result<RegistryIndex> {
        let path = self.root.join(INDEX_FILE);
        if !path.exists() {
            if !self.root.is_dir() {
                return Err(self.unreachable(format!("{} is gone", self.root.display())));
            }
            return Ok(RegistryIndex::new());
        }
        read_yaml(&path)
    }

    /// Published versions of `name`, ascending.
    pub fn versions(&self, name: &PackageName) -> Result<Vec<VersionInfo>> {
        Ok(self
            .index()?
            .find(name)
            .map(|e| e.versions.clone())
            .unwrap_or_default())
    }

    /// Add an archive to the registry.
    ///
    /// Republishing an existing version is rejected with
    /// [`Error::PublishConflict`] unless `options.overwrite` is set.
    pub fn publish(
        &self,
        archive: &PackageArchive,
        options: &PublishOptions,
    ) -> Result<PublishReceipt> {
        let manifest = archive.manifest()?;
        let _guard = FileLock::acquire(&self.root.join(PUBLISH_LOCK))?;

        let mut index = self.index()?;
        if let Some(existing) = index
            .find(&manifest.name)
            .and_then(|e| e.find_version(&manifest.version))
            && !options.overwrite
        {
            return Err(Error::PublishConflict {
                package: manifest.name.clone(),
                version: manifest.version.to_string(),
                digest: existing.digest.to_string(),
            });
        }

        let file_name = manifest.name.archive_path(&manifest.version);
        let archive_path = self.root.join(PACKAGES_DIR).join(&file_name);
        archive.write_to(&archive_path)?;

        let entry = index.entry_mut(&manifest.name);
        if !manifest.description.is_empty() {
            entry.description.clone_from(&manifest.description);
        }
        let replaced = entry
            .upsert_version(VersionInfo {
                version: manifest.version.clone(),
                digest: archive.digest().clone(),
                archive: file_name,
                tag: options.tag.clone(),
                dependencies: manifest.dependencies.clone(),
                published_at: Utc::now(),
            })
            .map(|old| old.digest);
        refresh_tags(entry, options.tag.as_deref(), &manifest.version);

        write_yaml(&self.root.join(INDEX_FILE), &index)?;

        tracing::info!(
            registry = %self.name,
            package = %manifest.name,
            version = %manifest.version,
            digest = archive.digest().short(),
            "Published"
        );
        Ok(PublishReceipt {
            name: manifest.name,
            version: manifest.version,
            digest: archive.digest().clone(),
            archive: archive_path,
            replaced,
        })
    }

    /// Pick the version of `name` matching `selector`.
    pub fn select(&self, name: &PackageName, selector: &Selector) -> Result<VersionInfo> {
        let index = self.index()?;
        let entry = index.find(name).ok_or_else(|| Error::PackageNotFound {
            package: name.clone(),
            required_by: None,
        })?;
        let found = match selector {
            Selector::Tag(tag) => entry.find_tag(tag),
            Selector::Constraint(c) => entry.versions.iter().rev().find(|v| c.matches(&v.version)),
        };
        found.cloned().ok_or_else(|| Error::PackageNotFound {
            package: name.clone(),
            required_by: Some(match selector {
                Selector::Tag(tag) => format!("tag '{tag}'"),
                Selector::Constraint(c) => format!("constraint '{c}'"),
            }),
        })
    }

    /// Select a version and return its verified archive.
    pub fn fetch(
        &self,
        name: &PackageName,
        selector: &Selector,
    ) -> Result<(VersionInfo, PackageArchive)> {
        let info = self.select(name, selector)?;
        let bytes = self.read_blob(&info)?;
        let subject = format!("{name}@{}", info.version);
        let archive = PackageArchive::verified(bytes, &info.digest, &subject)?;
        Ok((info, archive))
    }

    /// Raw archive bytes for a version, unverified.
    pub fn read_blob(&self, info: &VersionInfo) -> Result<Vec<u8>> {
        let path = self.root.join(PACKAGES_DIR).join(&info.archive);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                self.unreachable(format!("archive {} is missing", path.display()))
            } else {
                Error::io(&path, e)
            }
        })
    }

    /// Rank packages against `query`.
    ///
    /// Exact name matches come first, then name substrings, then description
    /// substrings; ties go to the most recently published package.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        let index = self.index()?;

        let mut hits: Vec<SearchHit> = index
            .packages
            .values()
            .filter_map(|entry| {
                let matched = match_kind(entry, &needle)?;
                let latest = entry.latest()?;
                Some(SearchHit {
                    name: entry.name.clone(),
                    latest: latest.version.clone(),
                    description: entry.description.clone(),
                    registry: self.name.clone(),
                    matched,
                    published_at: entry.last_published(),
                })
            })
            .collect();

        hits.sort_by(rank_hits);
        Ok(hits)
    }

    fn unreachable(&self, reason: String) -> Error {
        Error::RegistryUnreachable {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Order for search hits, within one registry and across registries in
/// [`crate::ops::search()`].
pub fn rank_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.matched
        .cmp(&b.matched)
        .then_with(|| b.published_at.cmp(&a.published_at))
        .then_with(|| a.name.cmp(&b.name))
}

fn match_kind(entry: &IndexEntry, needle: &str) -> Option<MatchKind> {
    if needle.is_empty() {
        return Some(MatchKind::Name);
    }
    if entry.name.as_str() == needle || entry.name.name() == needle {
        Some(MatchKind::ExactName)
    } else if entry.name.as_str().contains(needle) {
        Some(MatchKind::Name)
    } else if entry.description.to_lowercase().contains(needle) {
        Some(MatchKind::Description)
    } else {
        None
    }
}

fn refresh_tags(entry: &mut IndexEntry, tag: Option<&str>, published: &Version) {
    if let Some(latest) = entry.latest().map(|v| v.version.clone()) {
        entry.dist_tags.insert(LATEST_TAG.to_string(), latest);
    }
    if let Some(tag) = tag.filter(|t| *t != LATEST_TAG) {
        entry.dist_tags.insert(tag.to_string(), published.clone());
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).at(path)?;
    serde_yaml::from_str(&content).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_yaml::to_string(value).map_err(|source| Error::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aam_schema::MANIFEST_FILE;

    fn build(dir: &Path, name: &str, version: &str, description: &str) -> PackageArchive {
        let root = dir.join(format!("{}-{version}", name.replace('/', "_")));
        fs::create_dir_all(root.join("agents")).unwrap();
        fs::write(root.join("agents/a.agent.md"), format!("{name} {version}")).unwrap();
        fs::write(
            root.join(MANIFEST_FILE),
            format!(
                "name: \"{name}\"\nversion: {version}\ndescription: {description}\nartifacts:\n  - type: agent\n    path: agents/a.agent.md\n"
            ),
        )
        .unwrap();
        PackageArchive::pack(&root).unwrap().1
    }

    fn registry(dir: &Path) -> LocalRegistry {
        LocalRegistry::init(&dir.join("reg"), "local", "test registry").unwrap()
    }

    #[test]
    fn init_writes_layout() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(reg.root().join(PACKAGES_DIR).is_dir());
        assert_eq!(reg.meta().unwrap().name, "local");
        assert!(reg.index().unwrap().packages.is_empty());
        assert!(LocalRegistry::init(reg.root(), "again", "").is_err());
    }

    #[test]
    fn open_missing_registry_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalRegistry::open("gone", &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::RegistryUnreachable { .. }));
    }

    #[test]
    fn publish_then_fetch_highest_match() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        for v in ["1.0.0", "1.2.0", "2.0.0"] {
            reg.publish(&build(dir.path(), "dep-a", v, "x"), &PublishOptions::default())
                .unwrap();
        }

        let name = PackageName::parse("dep-a").unwrap();
        let (info, archive) = reg
            .fetch(&name, &Constraint::parse("^1.0.0").unwrap().into())
            .unwrap();
        assert_eq!(info.version, Version::new(1, 2, 0));
        assert_eq!(archive.manifest().unwrap().version, Version::new(1, 2, 0));

        let entry = reg.index().unwrap().find(&name).cloned().unwrap();
        assert_eq!(entry.dist_tags[LATEST_TAG], Version::new(2, 0, 0));
        assert!(
            reg.root()
                .join(PACKAGES_DIR)
                .join("dep-a/dep-a-1.2.0.aam.sha256")
                .is_file()
        );
    }

    #[test]
    fn republish_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.publish(&build(dir.path(), "p", "1.0.0", "first"), &PublishOptions::default())
            .unwrap();

        let changed = build(&dir.path().join("second"), "p", "1.0.0", "second");
        let err = reg.publish(&changed, &PublishOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PublishConflict { .. }));

        let receipt = reg
            .publish(
                &changed,
                &PublishOptions {
                    overwrite: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(receipt.replaced.is_some());
        assert_eq!(reg.versions(&receipt.name).unwrap().len(), 1);
    }

    #[test]
    fn similar_names_keep_separate_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let first = reg
            .publish(&build(dir.path(), "@a/b-c", "1.0.0", "x"), &PublishOptions::default())
            .unwrap();
        let second = reg
            .publish(&build(dir.path(), "@a-b/c", "1.0.0", "y"), &PublishOptions::default())
            .unwrap();
        assert_ne!(first.archive, second.archive);

        let overwrite = PublishOptions {
            overwrite: true,
            ..Default::default()
        };
        reg.publish(&build(&dir.path().join("again"), "@a-b/c", "1.0.0", "z"), &overwrite)
            .unwrap();

        let (info, archive) = reg.fetch(&first.name, &Constraint::Any.into()).unwrap();
        assert_eq!(info.digest, first.digest);
        assert_eq!(archive.manifest().unwrap().name, first.name);
    }

    #[test]
    fn fetch_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.publish(&build(dir.path(), "p", "1.0.0", "x"), &PublishOptions::default())
            .unwrap();
        reg.publish(
            &build(dir.path(), "p", "2.0.0-beta.1", "x"),
            &PublishOptions {
                tag: Some("beta".into()),
                overwrite: false,
            },
        )
        .unwrap();

        let name = PackageName::parse("p").unwrap();
        let (info, _) = reg.fetch(&name, &Selector::Tag("beta".into())).unwrap();
        assert_eq!(info.version.to_string(), "2.0.0-beta.1");
        let (latest, _) = reg.fetch(&name, &Selector::Tag(LATEST_TAG.into())).unwrap();
        assert_eq!(latest.version, Version::new(1, 0, 0));
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        let receipt = reg
            .publish(&build(dir.path(), "p", "1.0.0", "x"), &PublishOptions::default())
            .unwrap();

        let mut bytes = fs::read(&receipt.archive).unwrap();
        bytes[10] ^= 0x01;
        fs::write(&receipt.archive, bytes).unwrap();

        let err = reg
            .fetch(&receipt.name, &Selector::Constraint(Constraint::Any))
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn search_ranks_exact_then_substring() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        reg.publish(&build(dir.path(), "review-tools", "1.0.0", "helpers"), &PublishOptions::default())
            .unwrap();
        reg.publish(&build(dir.path(), "linter", "1.0.0", "helps review code"), &PublishOptions::default())
            .unwrap();
        reg.publish(&build(dir.path(), "@acme/review", "1.0.0", "x"), &PublishOptions::default())
            .unwrap();

        let hits = reg.search("Review").unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["@acme/review", "review-tools", "linter"]);
        assert_eq!(hits[2].matched, MatchKind::Description);
    }
}
