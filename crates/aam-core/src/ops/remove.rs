//! Uninstall: `Committed -> Undeploying -> Removed`.

use std::collections::BTreeSet;
use std::sync::Arc;

use aam_schema::{PackageName, Version};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::lockfile::{LockEntry, LockFile};
use crate::ops::Context;
use crate::ops::deploy::{remove_package_dir, undeploy_files};
use crate::ops::flow::Stage;

#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// Remove even if installed files were edited.
    pub force: bool,
    /// Proceed even though other installed packages depend on this one.
    pub confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    pub package: PackageName,
    pub version: Version,
    /// Project-relative files that were removed.
    pub files: Vec<String>,
    /// Dependents that were overridden by `confirm`.
    pub dependents: Vec<PackageName>,
    /// Installed packages nothing requires any more. They stay installed
    /// until the next apply prunes them.
    pub orphans: Vec<PackageName>,
}

/// Uninstall `name`.
///
/// Fails with [`Error::DependentsExist`] if other installed packages declare
/// a dependency on it and `options.confirm` is not set, and with
/// [`Error::LocalModificationConflict`] if its files were edited and
/// `options.force` is not set.
pub async fn uninstall(
    ctx: &Context,
    name: &PackageName,
    options: UninstallOptions,
) -> Result<UninstallReport> {
    let lock = ctx.read_lock().await?;
    let entry = lock.get(name).cloned().ok_or_else(|| Error::PackageNotFound {
        package: name.clone(),
        required_by: Some("the lock file".into()),
    })?;

    let dependents = lock.dependents_of(name);
    if !dependents.is_empty() && !options.confirm {
        return Err(Error::DependentsExist {
            package: name.clone(),
            dependents,
        });
    }

    remove_installed(ctx, name, &entry, options.force).await?;

    let orphans = orphans(&ctx.read_lock().await?);
    if !orphans.is_empty() {
        tracing::info!(count = orphans.len(), "Orphaned packages left installed");
    }
    Ok(UninstallReport {
        package: name.clone(),
        version: entry.version.clone(),
        files: entry.files.iter().map(|f| f.path.clone()).collect(),
        dependents,
        orphans,
    })
}

/// Undeploy a package's files, delete its unpacked copy and drop it from the
/// lock, including its root constraint.
pub(crate) async fn remove_installed(
    ctx: &Context,
    name: &PackageName,
    entry: &LockEntry,
    force: bool,
) -> Result<()> {
    if !force {
        let files = entry.modified_files(&ctx.config.project_root);
        if !files.is_empty() {
            return Err(Error::LocalModificationConflict {
                package: name.clone(),
                files,
            });
        }
    }

    ctx.reporter.removing(name, &entry.version);
    ctx.reporter.stage(name, Some(&entry.version), Stage::Undeploying);

    let config = Arc::clone(&ctx.config);
    let adapters = ctx.adapters.clone();
    let files = entry.files.clone();
    let task_name = name.clone();
    tokio::task::spawn_blocking(move || {
        undeploy_files(&config, &adapters, &files)
            .and_then(|()| remove_package_dir(&config, &task_name))
    })
    .await
    .map_err(|e| Error::Other(format!("undeploy task failed: {e}")))??;

    let task_name = name.clone();
    ctx.update_lock(move |l| {
        l.packages.remove(&task_name);
        l.dependencies.remove(&task_name);
    })
    .await?;

    ctx.reporter.stage(name, Some(&entry.version), Stage::Removed);
    tracing::info!(package = %name, version = %entry.version, "Removed");
    Ok(())
}

/// Locked packages not reachable from the lock's root constraints.
pub fn orphans(lock: &LockFile) -> Vec<PackageName> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&PackageName> = lock.dependencies.keys().collect();
    while let Some(name) = stack.pop() {
        if seen.insert(name.clone())
            && let Some(entry) = lock.packages.get(name)
        {
            stack.extend(entry.dependencies.keys());
        }
    }
    lock.packages
        .keys()
        .filter(|n| !seen.contains(*n))
        .cloned()
        .collect()
}
