pub mod config;
pub mod error;
pub mod lock;
pub mod lockfile;
pub mod logging;
pub mod manifest;
pub mod ops;
pub mod package;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod source;

pub mod reporter;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use lockfile::{LockEntry, LockFile, LockManager};
pub use manifest::Manifest;
pub use package::PackageArchive;
pub use registry::LocalRegistry;
pub use reporter::{NullReporter, Reporter, TracingReporter};
pub use resolver::{DependencyGraph, resolve};
