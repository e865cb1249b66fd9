//! Platform adapters: materialize artifacts in a platform's native layout.
//!
//! The engine only knows the [`PlatformAdapter`] capability set. Adapters are
//! picked per [`Platform`] from an [`AdapterSet`]; the default set uses
//! [`LayoutAdapter`] for every platform.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aam_schema::{ArtifactType, PackageName, Platform};
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};

/// One artifact to deploy, read from an unpacked package.
#[derive(Debug, Clone, Copy)]
pub struct DeployRequest<'a> {
    pub package: &'a PackageName,
    pub kind: ArtifactType,
    /// Absolute path of the artifact (a directory for skills).
    pub source: &'a Path,
}

pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Write the artifact and return the project-relative paths of every file
    /// written. Deploying the same artifact twice yields the same paths.
    fn deploy(&self, artifact: &DeployRequest<'_>) -> Result<Vec<PathBuf>>;

    /// Remove previously deployed files. Missing files are ignored.
    fn undeploy(&self, paths: &[PathBuf]) -> Result<()>;
}

/// Project directory a platform reads its artifacts from.
pub fn platform_dir(platform: Platform) -> &'static str {
    match platform {
        Platform::Claude => ".claude",
        Platform::Cursor => ".cursor",
        Platform::Copilot => ".github",
        Platform::Codex => ".codex",
    }
}

/// Copies artifacts to `<platform dir>/<type dir>/<package>/<artifact>`.
#[derive(Debug, Clone)]
pub struct LayoutAdapter {
    platform: Platform,
    project_root: PathBuf,
}

impl LayoutAdapter {
    pub fn new(platform: Platform, project_root: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            project_root: project_root.into(),
        }
    }

    fn target_rel(&self, artifact: &DeployRequest<'_>) -> PathBuf {
        Path::new(platform_dir(self.platform))
            .join(artifact.kind.dir_name())
            .join(artifact.package.fs_name())
    }

    fn deploy_error(&self, package: &PackageName, reason: impl ToString) -> Error {
        Error::Deploy {
            package: package.clone(),
            platform: self.platform,
            reason: reason.to_string(),
        }
    }
}

impl PlatformAdapter for LayoutAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn deploy(&self, artifact: &DeployRequest<'_>) -> Result<Vec<PathBuf>> {
        if !artifact.source.exists() {
            return Err(self.deploy_error(
                artifact.package,
                format!("{} does not exist", artifact.source.display()),
            ));
        }
        let name = artifact
            .source
            .file_name()
            .ok_or_else(|| self.deploy_error(artifact.package, "artifact has no file name"))?;
        let rel_dest = self.target_rel(artifact).join(name);
        let dest = self.project_root.join(&rel_dest);

        // Replace wholesale so a second deploy leaves no stale files behind.
        if dest.is_dir() {
            fs::remove_dir_all(&dest).at(&dest)?;
        }

        let mut written = Vec::new();
        if artifact.source.is_dir() {
            for entry in WalkDir::new(artifact.source).sort_by_file_name() {
                let entry = entry.map_err(|e| self.deploy_error(artifact.package, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(artifact.source)
                    .map_err(|e| self.deploy_error(artifact.package, e))?;
                copy_file(entry.path(), &dest.join(rel))?;
                written.push(rel_dest.join(rel));
            }
        } else {
            copy_file(artifact.source, &dest)?;
            written.push(rel_dest);
        }

        tracing::debug!(
            package = %artifact.package,
            platform = %self.platform,
            files = written.len(),
            "Deployed artifact"
        );
        Ok(written)
    }

    fn undeploy(&self, paths: &[PathBuf]) -> Result<()> {
        for rel in paths {
            let path = self.project_root.join(rel);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&path, e)),
            }
            prune_empty_parents(&self.project_root, &path);
        }
        Ok(())
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::copy(from, to).at(to)?;
    Ok(())
}

/// Remove empty directories above `path`, stopping at `root`.
fn prune_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        // Fails on non-empty directories, which ends the walk.
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Adapter per platform.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: BTreeMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.adapters.keys()).finish()
    }
}

impl AdapterSet {
    /// [`LayoutAdapter`] for every platform.
    pub fn layout(project_root: &Path) -> Self {
        let adapters = Platform::ALL
            .into_iter()
            .map(|p| {
                (
                    p,
                    Arc::new(LayoutAdapter::new(p, project_root)) as Arc<dyn PlatformAdapter>,
                )
            })
            .collect();
        Self { adapters }
    }

    /// Replace the adapter for `adapter.platform()`.
    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> PackageName {
        PackageName::parse("@team/review").unwrap()
    }

    #[test]
    fn deploys_skill_directory_idempotently() {
        let project = tempfile::tempdir().unwrap();
        let pkg = tempfile::tempdir().unwrap();
        let skill = pkg.path().join("skills/review");
        fs::create_dir_all(skill.join("refs")).unwrap();
        fs::write(skill.join("SKILL.md"), "# Review").unwrap();
        fs::write(skill.join("refs/checklist.md"), "- tests").unwrap();

        let adapter = LayoutAdapter::new(Platform::Claude, project.path());
        let pkg_name = name();
        let request = DeployRequest {
            package: &pkg_name,
            kind: ArtifactType::Skill,
            source: &skill,
        };

        let first = adapter.deploy(&request).unwrap();
        let second = adapter.deploy(&request).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                PathBuf::from(".claude/skills/team--review/review/SKILL.md"),
                PathBuf::from(".claude/skills/team--review/review/refs/checklist.md"),
            ]
        );
        assert!(project.path().join(&first[1]).is_file());
    }

    #[test]
    fn undeploy_removes_files_and_empty_dirs() {
        let project = tempfile::tempdir().unwrap();
        let pkg = tempfile::tempdir().unwrap();
        let agent = pkg.path().join("reviewer.md");
        fs::write(&agent, "agent").unwrap();

        let adapter = LayoutAdapter::new(Platform::Cursor, project.path());
        let pkg_name = name();
        let paths = adapter
            .deploy(&DeployRequest {
                package: &pkg_name,
                kind: ArtifactType::Agent,
                source: &agent,
            })
            .unwrap();
        assert_eq!(paths, vec![PathBuf::from(".cursor/agents/team--review/reviewer.md")]);

        adapter.undeploy(&paths).unwrap();
        adapter.undeploy(&paths).unwrap();
        assert!(!project.path().join(".cursor").exists());
        assert!(project.path().exists());
    }

    #[test]
    fn missing_source_is_a_deploy_error() {
        let project = tempfile::tempdir().unwrap();
        let adapter = LayoutAdapter::new(Platform::Codex, project.path());
        let pkg_name = name();
        let missing = project.path().join("nope.md");
        let err = adapter
            .deploy(&DeployRequest {
                package: &pkg_name,
                kind: ArtifactType::Prompt,
                source: &missing,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Deploy { platform: Platform::Codex, .. }));
    }
}
