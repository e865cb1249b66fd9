//! Resolve, plan and apply installs.
//!
//! Every call re-resolves the whole project: the root constraints recorded in
//! the lock plus whatever is being requested. Locked versions are preferred,
//! so installing one package never upgrades unrelated ones.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use aam_schema::{Constraint, PackageName};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::lockfile::{self, DriftReport, LockDiff, LockFile};
use crate::manifest::Manifest;
use crate::ops::Context;
use crate::ops::batch::{self, Job};
use crate::ops::catalog::{SourceRefresh, build_catalog};
use crate::ops::flow::{ApplyReport, PackageFailure, Skipped, Stage};
use crate::ops::remove::remove_installed;
use crate::resolver::{self, DependencyGraph, ResolveOptions};

/// A resolved graph and what applying it would change.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub dry_run: bool,
    /// Overwrite locally modified files when upgrading or removing.
    pub force: bool,
    pub graph: DependencyGraph,
    pub diff: LockDiff,
}

/// Root constraints declared by the project's own `aam.yaml`.
pub fn project_dependencies(project_root: &Path) -> Result<BTreeMap<PackageName, Constraint>> {
    let manifest = Manifest::load(project_root)?;
    manifest.validate(project_root)?;
    Ok(manifest.dependencies)
}

/// Resolve `roots` against the current catalogs, preferring locked versions.
pub async fn resolve(
    ctx: &Context,
    roots: &BTreeMap<PackageName, Constraint>,
) -> Result<DependencyGraph> {
    let lock = ctx.read_lock().await?;
    let catalog = build_catalog(ctx, &lock, SourceRefresh::IfMissing).await?;
    let options = ResolveOptions {
        prefer: lock.preferences(),
    };
    resolver::resolve(roots, &catalog, &options)
}

/// Resolve the project with `requested` added to its roots and diff the
/// result against the lock. Nothing on disk changes.
///
/// A requested constraint replaces the recorded one for the same package.
pub async fn plan(
    ctx: &Context,
    requested: &BTreeMap<PackageName, Constraint>,
    dry_run: bool,
) -> Result<Plan> {
    for name in requested.keys() {
        ctx.reporter.stage(name, None, Stage::Requested);
    }

    let lock = ctx.read_lock().await?;
    let mut roots = lock.dependencies.clone();
    roots.extend(requested.iter().map(|(n, c)| (n.clone(), c.clone())));

    for name in requested.keys() {
        ctx.reporter.stage(name, None, Stage::Resolving);
    }
    let catalog = build_catalog(ctx, &lock, SourceRefresh::IfMissing).await?;
    let options = ResolveOptions {
        prefer: lock.preferences(),
    };
    let graph = match resolver::resolve(&roots, &catalog, &options) {
        Ok(graph) => graph,
        Err(err) => {
            for name in requested.keys() {
                ctx.reporter.failed(name, None, &err.to_string());
            }
            return Err(err);
        }
    };

    let diff = lockfile::diff(&lock, &graph);
    tracing::info!(
        install = diff.to_install.len(),
        upgrade = diff.to_upgrade.len(),
        remove = diff.to_remove.len(),
        unchanged = diff.unchanged.len(),
        dry_run,
        "Planned"
    );
    Ok(Plan {
        dry_run,
        force: false,
        graph,
        diff,
    })
}

/// Bring the project to `plan`'s graph.
///
/// A dry-run plan only reports the stages it would run.
pub async fn apply(ctx: &Context, plan: &Plan) -> Result<ApplyReport> {
    let lock = ctx.read_lock().await?;
    let report = execute(ctx, &lock, &plan.diff, plan.force, plan.dry_run, "install").await?;

    if !plan.dry_run {
        let roots = plan.graph.roots.clone();
        ctx.update_lock(move |l| {
            l.dependencies = roots
                .into_iter()
                .filter(|(name, _)| l.packages.contains_key(name))
                .collect();
        })
        .await?;
    }
    Ok(report)
}

/// Plan and apply in one step.
pub async fn install(
    ctx: &Context,
    requested: &BTreeMap<PackageName, Constraint>,
) -> Result<ApplyReport> {
    let plan = plan(ctx, requested, false).await?;
    apply(ctx, &plan).await
}

/// What re-resolving the locked roots would change.
pub async fn diff_lock(ctx: &Context) -> Result<LockDiff> {
    let lock = ctx.read_lock().await?;
    let graph = resolve(ctx, &lock.dependencies).await?;
    Ok(lockfile::diff(&lock, &graph))
}

/// Drift of the installed packages against freshly synced catalogs.
pub async fn outdated(ctx: &Context) -> Result<DriftReport> {
    let lock = ctx.read_lock().await?;
    let catalog = build_catalog(ctx, &lock, SourceRefresh::Always).await?;
    Ok(lockfile::check_drift(&lock, &catalog, &ctx.config.project_root))
}

/// Shared tail of install and upgrade: run the diff's installs and upgrades,
/// then drop packages the graph no longer needs.
pub(crate) async fn execute(
    ctx: &Context,
    lock: &LockFile,
    diff: &LockDiff,
    force: bool,
    dry_run: bool,
    action: &str,
) -> Result<ApplyReport> {
    let started = Instant::now();
    let mut report = ApplyReport {
        dry_run,
        unchanged: diff.unchanged.clone(),
        ..ApplyReport::default()
    };

    let mut jobs: Vec<Job> = diff
        .to_install
        .iter()
        .map(|pkg| Job {
            pkg: pkg.clone(),
            previous: None,
        })
        .collect();

    for upgrade in &diff.to_upgrade {
        let previous = lock.get(&upgrade.to.name).cloned();
        if !force && let Some(entry) = &previous {
            let files = entry.modified_files(&ctx.config.project_root);
            if !files.is_empty() {
                let err = Error::LocalModificationConflict {
                    package: upgrade.to.name.clone(),
                    files,
                };
                ctx.reporter.skipped(&upgrade.to.name, &err.to_string());
                report.skipped.push(Skipped {
                    package: upgrade.to.name.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                });
                continue;
            }
        }
        jobs.push(Job {
            pkg: upgrade.to.clone(),
            previous,
        });
    }

    if dry_run {
        for job in &jobs {
            ctx.reporter
                .stage(&job.pkg.name, Some(&job.pkg.version), Stage::DryRun);
        }
        for removal in &diff.to_remove {
            ctx.reporter
                .stage(&removal.name, Some(&removal.entry.version), Stage::DryRun);
        }
        return Ok(report);
    }

    batch::run(ctx, jobs, &mut report).await?;

    let removing: BTreeSet<PackageName> = diff.to_remove.iter().map(|r| r.name.clone()).collect();
    for removal in &diff.to_remove {
        let current = ctx.read_lock().await?;
        let still_needed = current.dependencies.contains_key(&removal.name)
            || current
                .dependents_of(&removal.name)
                .iter()
                .any(|d| !removing.contains(d));
        if still_needed {
            continue;
        }
        let Some(entry) = current.get(&removal.name).cloned() else {
            continue;
        };
        match remove_installed(ctx, &removal.name, &entry, force).await {
            Ok(()) => report.removed.push(removal.name.clone()),
            Err(err @ Error::LocalModificationConflict { .. }) => {
                ctx.reporter.skipped(&removal.name, &err.to_string());
                report.skipped.push(Skipped {
                    package: removal.name.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
            Err(err @ Error::Lockfile { .. }) => return Err(err),
            Err(err) => report.failed.push(PackageFailure::new(
                removal.name.clone(),
                Some(entry.version.clone()),
                Stage::Undeploying,
                err,
            )),
        }
    }

    report.committed.sort_by(|a, b| a.name.cmp(&b.name));
    report.failed.sort_by(|a, b| a.package.cmp(&b.package));
    ctx.reporter.summary(
        report.committed.len(),
        action,
        started.elapsed().as_secs_f64(),
    );
    Ok(report)
}
