//! Upgrade installed packages.

use std::collections::BTreeSet;

use aam_schema::PackageName;

use crate::error::{Error, Result};
use crate::lockfile;
use crate::ops::Context;
use crate::ops::catalog::{SourceRefresh, build_catalog};
use crate::ops::flow::{ApplyReport, Stage};
use crate::ops::install::execute;
use crate::resolver::{self, ResolveOptions};

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Packages to upgrade. Empty means every installed package.
    pub packages: Vec<PackageName>,
    /// Overwrite locally modified files.
    pub force: bool,
    pub dry_run: bool,
}

/// Re-resolve the project without the lock's preference for the targeted
/// packages, and install whatever changed.
///
/// Targets with locally modified files are reported in `skipped` unless
/// `force` is set. Sources are fetched first so new revisions are seen.
pub async fn upgrade(ctx: &Context, options: &UpgradeOptions) -> Result<ApplyReport> {
    let lock = ctx.read_lock().await?;
    for name in &options.packages {
        if lock.get(name).is_none() {
            return Err(Error::PackageNotFound {
                package: name.clone(),
                required_by: Some("the lock file".into()),
            });
        }
    }

    let targets: BTreeSet<&PackageName> = options.packages.iter().collect();
    for name in lock.packages.keys() {
        if targets.is_empty() || targets.contains(name) {
            ctx.reporter.stage(name, None, Stage::Resolving);
        }
    }

    let catalog = build_catalog(ctx, &lock, SourceRefresh::Always).await?;
    let mut prefer = lock.preferences();
    if targets.is_empty() {
        prefer.clear();
    } else {
        prefer.retain(|name, _| !targets.contains(name));
    }

    let graph = resolver::resolve(&lock.dependencies, &catalog, &ResolveOptions { prefer })?;
    let diff = lockfile::diff(&lock, &graph);
    tracing::info!(
        upgrade = diff.to_upgrade.len(),
        install = diff.to_install.len(),
        remove = diff.to_remove.len(),
        "Upgrade planned"
    );

    execute(ctx, &lock, &diff, options.force, options.dry_run, "upgrade").await
}
