//! Per-package pipeline states and batch results.
//!
//! ```text
//! Requested -> Resolving -> Fetching -> Verifying -> Deploying -> Committed
//!                  |            |            |            |
//!                  +------------+------------+------------+--> Failed
//! Committed -> Undeploying -> Removed
//! ```
//!
//! A dry run stops after resolving and reports `DryRun` instead of touching
//! any state.

use std::fmt;

use aam_schema::{PackageName, Version};
use serde::{Serialize, Serializer};

use crate::error::{Error, ErrorKind};
use crate::resolver::Provenance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requested,
    Resolving,
    Fetching,
    Verifying,
    Deploying,
    Committed,
    Failed,
    DryRun,
    Undeploying,
    Removed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::DryRun | Self::Removed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requested => "requested",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Verifying => "verifying",
            Self::Deploying => "deploying",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::DryRun => "dry-run",
            Self::Undeploying => "undeploying",
            Self::Removed => "removed",
        })
    }
}

/// A package that reached `Failed`, with the stage it failed in.
#[derive(Debug, Serialize)]
pub struct PackageFailure {
    pub package: PackageName,
    pub version: Option<Version>,
    pub stage: Stage,
    pub kind: ErrorKind,
    #[serde(serialize_with = "display")]
    pub error: Error,
}

impl PackageFailure {
    pub fn new(package: PackageName, version: Option<Version>, stage: Stage, error: Error) -> Self {
        Self {
            package,
            version,
            stage,
            kind: error.kind(),
            error,
        }
    }
}

impl fmt::Display for PackageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if let Some(v) = &self.version {
            write!(f, "@{v}")?;
        }
        // `Failed` means the stage itself is unknown.
        if self.stage == Stage::Failed {
            write!(f, " failed: {}", self.error)
        } else {
            write!(f, " failed while {}: {}", self.stage, self.error)
        }
    }
}

fn display<S: Serializer>(error: &Error, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// A package that was deliberately left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub package: PackageName,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommittedPackage {
    pub name: PackageName,
    /// Version before this batch, for upgrades.
    pub from: Option<Version>,
    pub version: Version,
    pub provenance: Provenance,
    pub files: usize,
}

/// Outcome of [`apply`](crate::ops::apply) or [`upgrade`](crate::ops::upgrade).
///
/// `committed`, `skipped` and `failed` never share a package.
#[derive(Debug, Default, Serialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub committed: Vec<CommittedPackage>,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<PackageFailure>,
    pub removed: Vec<PackageName>,
    pub unchanged: Vec<PackageName>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure(&self, name: &PackageName) -> Option<&PackageFailure> {
        self.failed.iter().find(|f| &f.package == name)
    }

    pub fn committed(&self, name: &PackageName) -> Option<&CommittedPackage> {
        self.committed.iter().find(|c| &c.name == name)
    }

    pub fn skipped(&self, name: &PackageName) -> Option<&Skipped> {
        self.skipped.iter().find(|s| &s.package == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_names_package_and_stage() {
        let failure = PackageFailure::new(
            PackageName::parse("dep-a").unwrap(),
            Some(Version::new(1, 2, 0)),
            Stage::Verifying,
            Error::ChecksumMismatch {
                subject: "dep-a@1.2.0".into(),
                expected: "aa".into(),
                actual: "bb".into(),
            },
        );
        let text = failure.to_string();
        assert!(text.starts_with("dep-a@1.2.0 failed while verifying"));
        assert_eq!(failure.kind, ErrorKind::ChecksumMismatch);

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["stage"], "verifying");
        assert_eq!(json["kind"], "checksum_mismatch");
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Committed.is_terminal());
        assert!(Stage::DryRun.is_terminal());
        assert!(!Stage::Deploying.is_terminal());
    }
}
