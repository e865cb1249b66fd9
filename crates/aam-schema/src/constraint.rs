//! Version constraints declared by manifests and requested by users.

use crate::types::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix marking a git revision pin (`rev:3f2a9c1`).
pub const REVISION_PREFIX: &str = "rev:";

/// Shortest revision prefix accepted in a `rev:` constraint.
const MIN_REVISION_LEN: usize = 4;

/// Errors produced when parsing a [`Constraint`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// Neither a version, a semver requirement, nor a revision pin.
    #[error("invalid version constraint '{input}': {reason}")]
    Invalid {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// A predicate over [`Version`]s (or, for source packages, revisions).
///
/// Supported syntax:
///
/// - `*`, `latest` or empty: any version
/// - `1.2.3`, `=1.2.3`: exactly that version
/// - `^1.2`, `~1.2.0`, `>=1.0, <2.0`: semver ranges
/// - `rev:<hex>`: a git revision (prefix match, at least 4 characters)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Constraint {
    /// Matches every version.
    #[default]
    Any,
    /// Matches one version exactly.
    Exact(Version),
    /// A semver range requirement.
    Range(semver::VersionReq),
    /// A git revision pin for source-provenance packages.
    Revision(String),
}

impl Constraint {
    /// Parse a constraint string.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError::Invalid`] when the input matches none of the
    /// supported forms.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let s = input.trim();
        if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("latest") {
            return Ok(Self::Any);
        }

        if let Some(rev) = s.strip_prefix(REVISION_PREFIX) {
            let rev = rev.trim().to_lowercase();
            if rev.len() < MIN_REVISION_LEN || !rev.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConstraintError::Invalid {
                    input: s.to_string(),
                    reason: format!(
                        "revision must be at least {MIN_REVISION_LEN} hex characters"
                    ),
                });
            }
            return Ok(Self::Revision(rev));
        }

        // A bare version means "exactly this version". The semver crate would
        // otherwise read `1.2.3` as `^1.2.3`.
        let exact = s.strip_prefix('=').unwrap_or(s).trim();
        if let Ok(version) = Version::parse(exact) {
            return Ok(Self::Exact(version));
        }

        semver::VersionReq::parse(s)
            .map(Self::Range)
            .map_err(|e| ConstraintError::Invalid {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// The exact-version constraint for `version`.
    pub fn exact(version: &Version) -> Self {
        Self::Exact(version.clone())
    }

    /// Whether `version` satisfies this constraint.
    ///
    /// Revision pins never match a registry version.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => v == version,
            Self::Range(req) => req.matches(version.as_semver()),
            Self::Revision(_) => false,
        }
    }

    /// Whether a source-provenance package pinned at `revision` (and carrying
    /// `version` from its own manifest) satisfies this constraint.
    ///
    /// Sources only accept equality: a revision prefix, an exact version, or
    /// the wildcard, which imposes nothing. Ranges always fail.
    pub fn matches_pin(&self, version: &Version, revision: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => v == version,
            Self::Revision(prefix) => revision.to_lowercase().starts_with(prefix.as_str()),
            Self::Range(_) => false,
        }
    }

    /// Whether this is the wildcard constraint.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(req) => write!(f, "{req}"),
            Self::Revision(rev) => write!(f, "{REVISION_PREFIX}{rev}"),
        }
    }
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Constraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn bare_version_is_exact() {
        let c = Constraint::parse("1.2.0").unwrap();
        assert_eq!(c, Constraint::Exact(v("1.2.0")));
        assert!(c.matches(&v("1.2.0")));
        assert!(!c.matches(&v("1.2.1")));
        assert_eq!(Constraint::parse("=1.2.0").unwrap(), c);
    }

    #[test]
    fn caret_and_tilde_ranges() {
        let caret = Constraint::parse("^1.0.0").unwrap();
        assert!(caret.matches(&v("1.2.0")));
        assert!(!caret.matches(&v("2.0.0")));

        let tilde = Constraint::parse("~1.2").unwrap();
        assert!(tilde.matches(&v("1.2.9")));
        assert!(!tilde.matches(&v("1.3.0")));

        let range = Constraint::parse(">=1.0, <2.0").unwrap();
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0.0")));
    }

    #[test]
    fn wildcard_forms() {
        for s in ["", "*", "latest", "LATEST"] {
            assert!(Constraint::parse(s).unwrap().is_any());
        }
    }

    #[test]
    fn revision_pins() {
        let c = Constraint::parse("rev:3F2A9C").unwrap();
        assert_eq!(c.to_string(), "rev:3f2a9c");
        assert!(c.matches_pin(&v("0.0.0"), "3f2a9c1d00"));
        assert!(!c.matches_pin(&v("0.0.0"), "aaaa9c1d00"));
        assert!(!c.matches(&v("1.0.0")));
        assert!(Constraint::parse("rev:xy").is_err());
    }

    #[test]
    fn ranges_never_match_source_pins() {
        let caret = Constraint::parse("^1.0.0").unwrap();
        assert!(!caret.matches_pin(&v("1.0.0"), "abcdef"));
        assert!(Constraint::Any.matches_pin(&v("1.0.0"), "abcdef"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Constraint::parse("not-a-version").is_err());
    }

    #[test]
    fn serde_uses_display_form() {
        let c: Constraint = serde_yaml::from_str("\"^1.0.0\"").unwrap();
        assert_eq!(serde_yaml::to_string(&c).unwrap().trim(), "^1.0.0");
    }
}
