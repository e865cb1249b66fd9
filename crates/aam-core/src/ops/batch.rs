//! Concurrent fetch/verify/deploy with serial lock commits.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use aam_schema::{PackageName, Sha256Digest, Version};

use crate::error::{Error, Result};
use crate::lockfile::{InstalledFile, LockEntry};
use crate::ops::Context;
use crate::ops::deploy::deploy_package;
use crate::ops::flow::{ApplyReport, CommittedPackage, PackageFailure, Stage};
use crate::package::PackageArchive;
use crate::resolver::ResolvedPackage;

/// One package to bring to `Committed`.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub pkg: ResolvedPackage,
    /// Lock entry being replaced, for upgrades.
    pub previous: Option<LockEntry>,
}

struct Deployed {
    pkg: ResolvedPackage,
    from: Option<Version>,
    digest: Sha256Digest,
    files: Vec<InstalledFile>,
}

/// Run every job, committing each deployed package as it finishes.
///
/// Package failures land in `report.failed` and never stop other jobs; a
/// worker that panics or dies is reported as a failure of its package. A
/// failed lock commit aborts the remaining jobs and is returned as the error.
pub(crate) async fn run(ctx: &Context, jobs: Vec<Job>, report: &mut ApplyReport) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }

    let permits = Arc::new(Semaphore::new(ctx.config.concurrency.max(1)));
    let mut set: JoinSet<Result<Deployed, PackageFailure>> = JoinSet::new();
    // Packages without an outcome yet.
    let mut pending: BTreeMap<PackageName, Version> = BTreeMap::new();

    for job in jobs {
        pending.insert(job.pkg.name.clone(), job.pkg.version.clone());
        let ctx = ctx.clone();
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Err(failure(&job.pkg, Stage::Requested, Error::Cancelled));
            };
            let pkg = job.pkg.clone();
            AssertUnwindSafe(run_job(&ctx, job))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(failure(
                        &pkg,
                        Stage::Failed,
                        Error::Other(format!("install worker panicked: {reason}")),
                    ))
                })
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(deployed)) => {
                pending.remove(&deployed.pkg.name);
                let committed = commit(ctx, deployed).await?;
                report.committed.push(committed);
            }
            Ok(Err(failure)) => {
                pending.remove(&failure.package);
                record_failure(ctx, report, failure);
            }
            Err(e) => {
                tracing::error!(error = %e, "Install worker stopped");
            }
        }
    }

    for (name, version) in pending {
        let err = Error::Other("install worker stopped before reporting".into());
        record_failure(
            ctx,
            report,
            PackageFailure::new(name, Some(version), Stage::Failed, err),
        );
    }
    Ok(())
}

fn record_failure(ctx: &Context, report: &mut ApplyReport, failure: PackageFailure) {
    ctx.reporter.failed(
        &failure.package,
        failure.version.as_ref(),
        &format!("{} ({})", failure.error, failure.stage),
    );
    report.failed.push(failure);
}

fn failure(pkg: &ResolvedPackage, stage: Stage, error: Error) -> PackageFailure {
    PackageFailure::new(pkg.name.clone(), Some(pkg.version.clone()), stage, error)
}

/// Report entry into `stage`, unless the batch was cancelled.
fn enter(ctx: &Context, pkg: &ResolvedPackage, stage: Stage) -> Result<(), PackageFailure> {
    if ctx.cancel.is_cancelled() {
        return Err(failure(pkg, stage, Error::Cancelled));
    }
    ctx.reporter.stage(&pkg.name, Some(&pkg.version), stage);
    Ok(())
}

async fn run_job(ctx: &Context, job: Job) -> Result<Deployed, PackageFailure> {
    let Job { pkg, previous } = job;

    enter(ctx, &pkg, Stage::Fetching)?;
    let fetched = ctx
        .fetcher
        .fetch(&pkg, ctx.reporter.as_ref())
        .await
        .map_err(|e| failure(&pkg, Stage::Fetching, e))?;

    enter(ctx, &pkg, Stage::Verifying)?;
    let subject = format!("{}@{}", pkg.name, pkg.version);
    let archive = match fetched.expected.or_else(|| pkg.digest.clone()) {
        Some(expected) => PackageArchive::verified(fetched.bytes, &expected, &subject),
        None => Ok(PackageArchive::from_bytes(fetched.bytes)),
    }
    .map_err(|e| failure(&pkg, Stage::Verifying, e))?;

    enter(ctx, &pkg, Stage::Deploying)?;
    let from = previous.as_ref().map(|e| e.version.clone());
    let digest = archive.digest().clone();
    let config = Arc::clone(&ctx.config);
    let adapters = ctx.adapters.clone();
    let task_pkg = pkg.clone();
    let files = tokio::task::spawn_blocking(move || {
        deploy_package(&config, &adapters, &task_pkg, &archive, previous.as_ref())
    })
    .await
    .map_err(|e| Error::Other(format!("deploy task failed: {e}")))
    .and_then(|r| r)
    .map_err(|e| failure(&pkg, Stage::Deploying, e))?;

    Ok(Deployed {
        pkg,
        from,
        digest,
        files,
    })
}

async fn commit(ctx: &Context, deployed: Deployed) -> Result<CommittedPackage> {
    let Deployed {
        pkg,
        from,
        digest,
        files,
    } = deployed;

    let count = files.len();
    let record = pkg.clone();
    ctx.update_lock(move |l| l.record(&record, digest, files))
        .await?;

    ctx.reporter.stage(&pkg.name, Some(&pkg.version), Stage::Committed);
    let detail = match &from {
        Some(old) => format!("upgraded from {old}"),
        None => "installed".to_string(),
    };
    ctx.reporter.done(&pkg.name, &pkg.version, &detail);

    Ok(CommittedPackage {
        name: pkg.name,
        from,
        version: pkg.version,
        provenance: pkg.provenance,
        files: count,
    })
}
