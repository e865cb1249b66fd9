//! Error taxonomy shared by every AAM component.
//!
//! Every failure surfaced to a caller names the offending package (or file)
//! and, for conflicts, the constraints or checksums involved.

use std::path::{Path, PathBuf};

use aam_schema::{PackageName, Platform};
use serde::Serialize;
use thiserror::Error;

use crate::resolver::Conflict;

/// Result alias used throughout `aam-core`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid manifest {}: {reason}", path.display())]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("{0}")]
    ResolutionConflict(Box<Conflict>),

    #[error("Package '{package}' not found in any registry or source{}", required_by.as_ref().map(|r| format!(" (required by {r})")).unwrap_or_default())]
    PackageNotFound {
        package: PackageName,
        required_by: Option<String>,
    },

    #[error("Checksum mismatch for {subject}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("Source '{name}' unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },

    #[error("Registry '{name}' unreachable: {reason}")]
    RegistryUnreachable { name: String, reason: String },

    #[error("{package} has locally modified files: {}", files.join(", "))]
    LocalModificationConflict {
        package: PackageName,
        files: Vec<String>,
    },

    #[error("{package} is required by: {}", dependents.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    DependentsExist {
        package: PackageName,
        dependents: Vec<PackageName>,
    },

    #[error("{package}@{version} is already published with digest {digest}; pass overwrite to replace it")]
    PublishConflict {
        package: PackageName,
        version: String,
        digest: String,
    },

    #[error("Deploy of {package} to {platform} failed: {reason}")]
    Deploy {
        package: PackageName,
        platform: Platform,
        reason: String,
    },

    #[error("Lock file {}: {reason}", path.display())]
    Lockfile { path: PathBuf, reason: String },

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("{subject} timed out after {secs}s")]
    Timeout { subject: String, secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Fieldless classification of an [`Error`], for callers that branch on the
/// category rather than the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ManifestInvalid,
    ResolutionConflict,
    PackageNotFound,
    ChecksumMismatch,
    SourceUnavailable,
    RegistryUnreachable,
    LocalModificationConflict,
    DependentsExist,
    PublishConflict,
    Deploy,
    Lockfile,
    Timeout,
    Cancelled,
    Io,
    Other,
}

impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ManifestInvalid { .. } => ErrorKind::ManifestInvalid,
            Self::ResolutionConflict(_) => ErrorKind::ResolutionConflict,
            Self::PackageNotFound { .. } => ErrorKind::PackageNotFound,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::SourceUnavailable { .. } | Self::Git { .. } => ErrorKind::SourceUnavailable,
            Self::RegistryUnreachable { .. } => ErrorKind::RegistryUnreachable,
            Self::LocalModificationConflict { .. } => ErrorKind::LocalModificationConflict,
            Self::DependentsExist { .. } => ErrorKind::DependentsExist,
            Self::PublishConflict { .. } => ErrorKind::PublishConflict,
            Self::Deploy { .. } => ErrorKind::Deploy,
            Self::Lockfile { .. } => ErrorKind::Lockfile,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } | Self::Yaml { .. } | Self::Archive(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether retrying the same operation might succeed.
    ///
    /// Only network and transport failures qualify; integrity and conflict
    /// errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceUnavailable
                | ErrorKind::RegistryUnreachable
                | ErrorKind::Timeout
                | ErrorKind::Io
        ) && !matches!(self, Self::Yaml { .. } | Self::Archive(_))
    }
}

/// Attach a path to `std::io::Result`s.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_is_final() {
        let err = Error::ChecksumMismatch {
            subject: "pkg@1.0.0".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = Error::RegistryUnreachable {
            name: "local".into(),
            reason: "timed out".into(),
        };
        assert!(err.is_retryable());
        assert!(Error::io("/tmp/x", std::io::Error::other("boom")).is_retryable());
        assert!(!Error::Archive("bad header".into()).is_retryable());
    }

    #[test]
    fn dependents_message_lists_packages() {
        let err = Error::DependentsExist {
            package: PackageName::parse("dep-a").unwrap(),
            dependents: vec![
                PackageName::parse("a").unwrap(),
                PackageName::parse("b").unwrap(),
            ],
        };
        assert_eq!(err.to_string(), "dep-a is required by: a, b");
    }
}
