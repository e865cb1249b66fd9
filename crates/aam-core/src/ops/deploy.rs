//! Materializing a verified archive on disk, and taking it back off.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use aam_schema::{PackageName, Platform, Sha256Digest};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::lockfile::{InstalledFile, LockEntry};
use crate::manifest::Manifest;
use crate::package::{PackageArchive, archive_path};
use crate::platform::{AdapterSet, DeployRequest};
use crate::resolver::ResolvedPackage;

/// Unpack `archive` into the package store and deploy every artifact to its
/// platforms. Returns the files written, with checksums.
///
/// All or nothing: artifacts deploy from a staging copy, and the package
/// store is only swapped once every platform succeeded. On failure the
/// files written by this call are undeployed and the previous version's
/// files (including local edits) are put back.
pub(crate) fn deploy_package(
    config: &Config,
    adapters: &AdapterSet,
    pkg: &ResolvedPackage,
    archive: &PackageArchive,
    previous: Option<&LockEntry>,
) -> Result<Vec<InstalledFile>> {
    let tmp = config.tmp_dir();
    fs::create_dir_all(&tmp).at(&tmp)?;
    let staging = tempfile::tempdir_in(&tmp).at(&tmp)?;
    let unpacked = staging.path().join("pkg");
    archive.unpack(&unpacked)?;

    let manifest = Manifest::load(&unpacked)?;
    if manifest.name != pkg.name || manifest.version != pkg.version {
        return Err(Error::ManifestInvalid {
            path: unpacked.join(aam_schema::MANIFEST_FILE),
            reason: format!(
                "archive contains {}@{}, expected {}@{}",
                manifest.name, manifest.version, pkg.name, pkg.version
            ),
        });
    }
    manifest.validate(&unpacked)?;

    let backup = staging.path().join("backup");
    let saved = match previous {
        Some(entry) => back_up_files(&config.project_root, &entry.files, &backup)?,
        None => Vec::new(),
    };

    let outcome = deploy_artifacts(config, adapters, pkg, &manifest, &unpacked).and_then(|deployed| {
        let finished = installed_files(config, &deployed).and_then(|files| {
            swap_install_dir(config, &pkg.name, &unpacked, staging.path()).map(|()| files)
        });
        if finished.is_err() {
            rollback(adapters, &deployed);
        }
        finished
    });
    let files = match outcome {
        Ok(files) => files,
        Err(err) => {
            restore_files(&config.project_root, &backup, &saved);
            return Err(err);
        }
    };

    if let Some(previous) = previous {
        let current: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let stale: Vec<InstalledFile> = previous
            .files
            .iter()
            .filter(|f| !current.contains(f.path.as_str()))
            .cloned()
            .collect();
        if let Err(err) = undeploy_files(config, adapters, &stale) {
            tracing::warn!(package = %pkg.name, error = %err, "Could not remove stale files");
        }
    }

    Ok(files)
}

/// Deploy each artifact of the staged package to each of its platforms.
/// A failure undeploys whatever this call already wrote.
fn deploy_artifacts(
    config: &Config,
    adapters: &AdapterSet,
    pkg: &ResolvedPackage,
    manifest: &Manifest,
    staged: &Path,
) -> Result<Vec<(Platform, Vec<PathBuf>)>> {
    let mut deployed: Vec<(Platform, Vec<PathBuf>)> = Vec::new();
    for decl in &manifest.artifacts {
        let source = staged.join(&decl.path);
        for platform in decl.target_platforms(&config.platforms) {
            let result = adapters
                .get(platform)
                .ok_or_else(|| Error::Deploy {
                    package: pkg.name.clone(),
                    platform,
                    reason: "no adapter registered".into(),
                })
                .and_then(|adapter| {
                    adapter.deploy(&DeployRequest {
                        package: &pkg.name,
                        kind: decl.kind,
                        source: &source,
                    })
                });
            match result {
                Ok(paths) => deployed.push((platform, paths)),
                Err(err) => {
                    rollback(adapters, &deployed);
                    return Err(err);
                }
            }
        }
    }
    Ok(deployed)
}

fn installed_files(
    config: &Config,
    deployed: &[(Platform, Vec<PathBuf>)],
) -> Result<Vec<InstalledFile>> {
    let mut files = Vec::new();
    for (platform, paths) in deployed {
        for rel in paths {
            let abs = config.project_root.join(rel);
            files.push(InstalledFile {
                path: archive_path(rel),
                sha256: Sha256Digest::compute_file(&abs).at(&abs)?,
                platform: Some(*platform),
            });
        }
    }
    Ok(files)
}

/// Move the staged package into the package store, keeping the old copy in
/// `staging` until the new one is in place.
fn swap_install_dir(
    config: &Config,
    name: &PackageName,
    staged: &Path,
    staging: &Path,
) -> Result<()> {
    let packages = config.packages_dir();
    fs::create_dir_all(&packages).at(&packages)?;
    let install_dir = packages.join(name.fs_name());
    let retired = staging.join("retired");

    let had_previous = install_dir.exists();
    if had_previous {
        fs::rename(&install_dir, &retired).at(&install_dir)?;
    }
    if let Err(e) = fs::rename(staged, &install_dir) {
        if had_previous && let Err(restore) = fs::rename(&retired, &install_dir) {
            tracing::warn!(package = %name, error = %restore, "Could not restore package directory");
        }
        return Err(Error::io(&install_dir, e));
    }
    Ok(())
}

/// Copy the recorded files that still exist into `backup`. Returns the
/// project-relative paths saved.
fn back_up_files(project_root: &Path, files: &[InstalledFile], backup: &Path) -> Result<Vec<String>> {
    let mut saved = Vec::new();
    for file in files {
        let from = project_root.join(&file.path);
        if !from.is_file() {
            continue;
        }
        let to = backup.join(&file.path);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::copy(&from, &to).at(&from)?;
        saved.push(file.path.clone());
    }
    Ok(saved)
}

fn restore_files(project_root: &Path, backup: &Path, saved: &[String]) {
    for rel in saved {
        let to = project_root.join(rel);
        let restored = to
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::copy(backup.join(rel), &to));
        if let Err(err) = restored {
            tracing::warn!(path = %to.display(), error = %err, "Could not restore file");
        }
    }
}

fn rollback(adapters: &AdapterSet, deployed: &[(Platform, Vec<PathBuf>)]) {
    for (platform, paths) in deployed {
        if let Some(adapter) = adapters.get(*platform)
            && let Err(err) = adapter.undeploy(paths)
        {
            tracing::warn!(%platform, error = %err, "Rollback failed");
        }
    }
}

/// Undeploy recorded files through their platform's adapter. Files without
/// a platform are deleted directly.
pub(crate) fn undeploy_files(
    config: &Config,
    adapters: &AdapterSet,
    files: &[InstalledFile],
) -> Result<()> {
    let mut by_platform: BTreeMap<Option<Platform>, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        by_platform
            .entry(file.platform)
            .or_default()
            .push(PathBuf::from(&file.path));
    }

    for (platform, paths) in by_platform {
        match platform.and_then(|p| adapters.get(p)) {
            Some(adapter) => adapter.undeploy(&paths)?,
            None => {
                for rel in paths {
                    let path = config.project_root.join(rel);
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(Error::io(&path, e)),
                    }
                }
            }
        }
    }
    Ok(())
}

/// Remove a package's unpacked copy from the package store.
pub(crate) fn remove_package_dir(config: &Config, entry_name: &PackageName) -> Result<()> {
    let dir = config.packages_dir().join(entry_name.fs_name());
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(&dir, e)),
    }
}
