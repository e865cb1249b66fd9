//! Registry index definition (`index.yaml`).
//!
//! The index maps each package name to its published versions. Entries are
//! append-only per version: the registry store refuses to replace a digest
//! unless explicitly told to overwrite.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::hash::Sha256Digest;
use crate::types::{PackageName, Version};

/// Current on-disk index format.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// One published version of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The published version.
    pub version: Version,
    /// SHA-256 of the archive bytes.
    pub digest: Sha256Digest,
    /// Archive path relative to the registry's `packages/` directory.
    pub archive: String,
    /// Tag supplied at publish time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Dependencies declared by this version's manifest.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PackageName, Constraint>,
    /// When the version was published.
    pub published_at: DateTime<Utc>,
}

/// All published versions of one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Package name.
    pub name: PackageName,
    /// Description from the most recently published manifest.
    #[serde(default)]
    pub description: String,
    /// Named pointers to versions (`latest`, `stable`, ...).
    #[serde(default)]
    pub dist_tags: BTreeMap<String, Version>,
    /// Published versions, sorted ascending.
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
}

impl IndexEntry {
    /// Create an empty entry for `name`.
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            description: String::new(),
            dist_tags: BTreeMap::new(),
            versions: Vec::new(),
        }
    }

    /// Highest non-prerelease version, falling back to the highest prerelease.
    pub fn latest(&self) -> Option<&VersionInfo> {
        self.versions
            .iter()
            .rev()
            .find(|v| !v.version.is_prerelease())
            .or_else(|| self.versions.last())
    }

    /// Look up an exact version.
    pub fn find_version(&self, version: &Version) -> Option<&VersionInfo> {
        self.versions.iter().find(|v| &v.version == version)
    }

    /// Resolve a dist-tag to its version info.
    pub fn find_tag(&self, tag: &str) -> Option<&VersionInfo> {
        self.dist_tags
            .get(tag)
            .and_then(|version| self.find_version(version))
    }

    /// Insert or replace a version, keeping the list sorted ascending.
    ///
    /// Returns the previous info for the same version, if any.
    pub fn upsert_version(&mut self, info: VersionInfo) -> Option<VersionInfo> {
        match self.versions.binary_search_by(|v| v.version.cmp(&info.version)) {
            Ok(pos) => Some(std::mem::replace(&mut self.versions[pos], info)),
            Err(pos) => {
                self.versions.insert(pos, info);
                None
            }
        }
    }

    /// Most recent publish time across all versions.
    pub fn last_published(&self) -> Option<DateTime<Utc>> {
        self.versions.iter().map(|v| v.published_at).max()
    }
}

/// The registry index: package name to published versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryIndex {
    /// Index format version.
    pub format_version: u32,
    /// Entries keyed by package name.
    #[serde(default)]
    pub packages: BTreeMap<PackageName, IndexEntry>,
}

impl RegistryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            packages: BTreeMap::new(),
        }
    }

    /// Find a package entry.
    pub fn find(&self, name: &PackageName) -> Option<&IndexEntry> {
        self.packages.get(name)
    }

    /// Get or create the entry for `name`.
    pub fn entry_mut(&mut self, name: &PackageName) -> &mut IndexEntry {
        self.packages
            .entry(name.clone())
            .or_insert_with(|| IndexEntry::new(name.clone()))
    }
}

impl Default for RegistryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(version: &str) -> VersionInfo {
        VersionInfo {
            version: Version::parse(version).unwrap(),
            digest: Sha256Digest::compute(version.as_bytes()),
            archive: format!("pkg-{version}.aam"),
            tag: None,
            dependencies: BTreeMap::new(),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn versions_stay_sorted() {
        let mut entry = IndexEntry::new(PackageName::parse("pkg").unwrap());
        for v in ["1.2.0", "1.0.0", "2.0.0-rc.1", "1.10.0"] {
            assert!(entry.upsert_version(info(v)).is_none());
        }
        let order: Vec<String> = entry.versions.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(order, ["1.0.0", "1.2.0", "1.10.0", "2.0.0-rc.1"]);
    }

    #[test]
    fn latest_skips_prereleases() {
        let mut entry = IndexEntry::new(PackageName::parse("pkg").unwrap());
        entry.upsert_version(info("1.0.0"));
        entry.upsert_version(info("2.0.0-rc.1"));
        assert_eq!(entry.latest().unwrap().version.to_string(), "1.0.0");
    }

    #[test]
    fn upsert_returns_replaced_version() {
        let mut entry = IndexEntry::new(PackageName::parse("pkg").unwrap());
        entry.upsert_version(info("1.0.0"));
        let previous = entry.upsert_version(info("1.0.0"));
        assert!(previous.is_some());
        assert_eq!(entry.versions.len(), 1);
    }

    #[test]
    fn index_yaml_roundtrip_keeps_entries() {
        let mut index = RegistryIndex::new();
        let name = PackageName::parse("@acme/review").unwrap();
        let entry = index.entry_mut(&name);
        entry.upsert_version(info("1.0.0"));
        entry
            .dist_tags
            .insert("latest".into(), Version::parse("1.0.0").unwrap());

        let yaml = serde_yaml::to_string(&index).unwrap();
        let parsed: RegistryIndex = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, index);
        assert!(parsed.find(&name).unwrap().find_tag("latest").is_some());
    }
}
