//! Shared types and on-disk formats for AAM.
//!
//! Everything in this crate is plain data: names, versions, constraints,
//! digests and the registry index layout. Behavior that touches the
//! filesystem or the network lives in `aam-core`.

pub mod artifact;
pub mod constraint;
pub mod hash;
pub mod index;
pub mod types;

// Re-exports
pub use artifact::{ArtifactType, Platform};
pub use constraint::{Constraint, ConstraintError};
pub use hash::Sha256Digest;
pub use index::{IndexEntry, RegistryIndex, VersionInfo};
pub use types::{NameError, PackageName, Version};

/// File name of a package manifest inside a package root.
pub const MANIFEST_FILE: &str = "aam.yaml";

/// File name of the project lock file.
pub const LOCK_FILE: &str = "aam-lock.yaml";

/// Extension used for package archives.
pub const ARCHIVE_EXTENSION: &str = "aam";
