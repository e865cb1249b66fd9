//! Package names and versions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Errors produced when parsing a [`PackageName`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The input was empty.
    #[error("package name is empty")]
    Empty,

    /// The input did not match `@scope/name` or `name`.
    #[error("invalid package name '{0}': expected '@scope/name' or 'name' using [a-z0-9._-]")]
    Invalid(String),

    /// `--` separates scope from name on disk, so it may not appear in either.
    #[error("invalid package name '{0}': '--' is reserved")]
    ReservedSeparator(String),
}

/// Separator between scope and name in [`PackageName::fs_name`].
const FS_SCOPE_SEPARATOR: &str = "--";

fn name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^(?:@([a-z0-9][a-z0-9._-]*)/)?([a-z0-9][a-z0-9._-]*)$")
            .expect("static package name pattern is valid")
    })
}

/// A normalized package name, optionally scoped (`@scope/name`).
///
/// Names are case-insensitive and stored lowercase, so `@Acme/Review` and
/// `@acme/review` refer to the same package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    /// Parse and normalize a package name.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] if the input is empty, contains characters
    /// outside `[a-z0-9._-]` (after lowercasing) or contains `--`.
    pub fn parse(input: &str) -> Result<Self, NameError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        let lowered = trimmed.to_lowercase();
        if !name_pattern().is_match(&lowered) {
            return Err(NameError::Invalid(trimmed.to_string()));
        }
        if lowered.contains(FS_SCOPE_SEPARATOR) {
            return Err(NameError::ReservedSeparator(trimmed.to_string()));
        }
        Ok(Self(lowered))
    }

    /// The scope without the leading `@`, if any.
    pub fn scope(&self) -> Option<&str> {
        self.0
            .strip_prefix('@')
            .and_then(|rest| rest.split_once('/'))
            .map(|(scope, _)| scope)
    }

    /// The unscoped part of the name.
    pub fn name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A single path component safe to use as a directory name.
    ///
    /// `@scope/name` becomes `scope--name`; unscoped names are unchanged.
    /// Distinct names never share an `fs_name` since `--` cannot occur in
    /// a scope or a name.
    pub fn fs_name(&self) -> String {
        match self.scope() {
            Some(scope) => format!("{scope}{FS_SCOPE_SEPARATOR}{}", self.name()),
            None => self.0.clone(),
        }
    }

    /// Registry-relative archive path: `<fs_name>/<name>-<version>.aam`.
    ///
    /// Each package gets its own directory, so two packages never share a
    /// blob even when their `name-version` strings coincide.
    pub fn archive_path(&self, version: &Version) -> String {
        format!(
            "{}/{}-{version}.{}",
            self.fs_name(),
            self.name(),
            crate::ARCHIVE_EXTENSION
        )
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PackageName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A semantic version (`major.minor.patch[-pre][+build]`).
///
/// Ordering follows semver precedence, so `1.0.0-rc.1 < 1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(semver::Version);

impl Version {
    /// Build a release version from its three numeric components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse a version string. A leading `v` is accepted (`v1.2.0`).
    ///
    /// # Errors
    ///
    /// Returns the underlying semver error for malformed input.
    pub fn parse(input: &str) -> Result<Self, semver::Error> {
        let trimmed = input.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(bare).map(Self)
    }

    /// Whether this is a pre-release version.
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Access the underlying semver value.
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for Version {
    fn from(v: semver::Version) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scoped_and_plain_names() {
        let scoped = PackageName::parse("@Acme/Code-Review").unwrap();
        assert_eq!(scoped.as_str(), "@acme/code-review");
        assert_eq!(scoped.scope(), Some("acme"));
        assert_eq!(scoped.name(), "code-review");

        let plain = PackageName::parse("dep-a").unwrap();
        assert_eq!(plain.scope(), None);
        assert_eq!(plain.name(), "dep-a");
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(PackageName::parse("  "), Err(NameError::Empty));
        assert!(PackageName::parse("@scope").is_err());
        assert!(PackageName::parse("a/b").is_err());
        assert!(PackageName::parse("-leading").is_err());
        assert!(PackageName::parse("has space").is_err());
    }

    #[test]
    fn archive_and_fs_names() {
        let v = Version::parse("1.2.0").unwrap();
        let scoped = PackageName::parse("@acme/review").unwrap();
        assert_eq!(scoped.archive_path(&v), "acme--review/review-1.2.0.aam");
        assert_eq!(scoped.fs_name(), "acme--review");

        let plain = PackageName::parse("review").unwrap();
        assert_eq!(plain.archive_path(&v), "review/review-1.2.0.aam");
    }

    #[test]
    fn double_dash_is_reserved() {
        assert!(matches!(
            PackageName::parse("a--b"),
            Err(NameError::ReservedSeparator(_))
        ));
        assert!(PackageName::parse("@a--b/c").is_err());
        assert!(PackageName::parse("@a/b--c").is_err());
    }

    #[test]
    fn disk_names_do_not_collide() {
        let v = Version::parse("1.0.0").unwrap();
        let a = PackageName::parse("@a/b-c").unwrap();
        let b = PackageName::parse("@a-b/c").unwrap();
        assert_ne!(a.fs_name(), b.fs_name());
        assert_ne!(a.archive_path(&v), b.archive_path(&v));

        let pre = Version::parse("1.0.0-1.0.0").unwrap();
        let short = PackageName::parse("b").unwrap();
        let long = PackageName::parse("b-1.0.0").unwrap();
        assert_ne!(short.archive_path(&pre), long.archive_path(&v));
    }

    #[test]
    fn prerelease_sorts_before_release() {
        let rc = Version::parse("1.0.0-rc.1").unwrap();
        let release = Version::parse("v1.0.0").unwrap();
        assert!(rc < release);
        assert!(rc.is_prerelease());
    }
}
