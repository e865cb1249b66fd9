//! Install, upgrade, uninstall and search pipelines.
//!
//! Every entry point takes a [`Context`] and returns a structured result
//! (never formatted text) so CLI and MCP front ends can render it.

mod batch;
pub mod catalog;
pub mod context;
mod deploy;
pub mod fetch;
pub mod flow;
mod install;
mod remove;
mod search;
mod upgrade;

pub use catalog::{SourceRefresh, build_catalog};
pub use context::Context;
pub use fetch::{Fetched, Fetcher, StoreFetcher};
pub use flow::{ApplyReport, CommittedPackage, PackageFailure, Skipped, Stage};
pub use install::{Plan, apply, diff_lock, install, outdated, plan, project_dependencies, resolve};
pub use remove::{UninstallOptions, UninstallReport, orphans, uninstall};
pub use search::search;
pub use upgrade::{UpgradeOptions, upgrade};
