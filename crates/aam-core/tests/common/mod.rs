#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aam_core::config::RetryPolicy;
use aam_core::manifest::{ArtifactDecl, ScaffoldOptions};
use aam_core::ops::Context;
use aam_core::registry::PublishOptions;
use aam_core::{Config, LocalRegistry, Manifest, NullReporter, PackageArchive};
use aam_schema::{ArtifactType, Constraint, PackageName, Version};
use tempfile::TempDir;

/// A project, an aam home and one local registry, all under a temp dir.
pub struct TestEnv {
    pub temp: TempDir,
    pub project: PathBuf,
    pub home: PathBuf,
    pub registry: LocalRegistry,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        let project = temp.path().join("project");
        let home = temp.path().join("home");
        fs::create_dir_all(&project).unwrap();
        fs::create_dir_all(&home).unwrap();
        let registry =
            LocalRegistry::init(&temp.path().join("registry"), "local", "test registry").unwrap();
        Self {
            temp,
            project,
            home,
            registry,
        }
    }

    pub fn config(&self) -> Config {
        Config::new(&self.project, &self.home)
            .with_registry("local", self.registry.root())
            .with_retry(fast_retry())
            .with_concurrency(4)
    }

    pub fn context(&self) -> Context {
        Context::new(self.config(), Arc::new(NullReporter)).unwrap()
    }

    /// Publish `name@version` with one agent file and the given dependencies.
    pub fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> PackageArchive {
        let archive = build_package(self.temp.path(), name, version, deps);
        self.registry
            .publish(&archive, &PublishOptions::default())
            .unwrap();
        archive
    }

    pub fn lock_path(&self) -> PathBuf {
        self.project.join(aam_schema::LOCK_FILE)
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        base_delay_ms: 1,
        factor: 2,
        timeout_secs: 10,
    }
}

pub fn name(s: &str) -> PackageName {
    PackageName::parse(s).unwrap()
}

pub fn roots(pairs: &[(&str, &str)]) -> BTreeMap<PackageName, Constraint> {
    pairs
        .iter()
        .map(|(n, c)| (name(n), Constraint::parse(c).unwrap()))
        .collect()
}

/// Pack a package whose only artifact is `agents/<name>.md`.
pub fn build_package(scratch: &Path, pkg: &str, version: &str, deps: &[(&str, &str)]) -> PackageArchive {
    let pkg_name = name(pkg);
    let root = scratch
        .join("build")
        .join(format!("{}-{version}", pkg_name.fs_name()));
    let agent_rel = format!("agents/{}.md", pkg_name.name());
    fs::create_dir_all(root.join("agents")).unwrap();
    fs::write(
        root.join(&agent_rel),
        format!("# {pkg} {version}\n\nReview code carefully.\n"),
    )
    .unwrap();

    let mut options = ScaffoldOptions::new(pkg_name);
    options.version = Some(Version::parse(version).unwrap());
    options.description = format!("{pkg} test package");
    options.artifacts = vec![ArtifactDecl::new(ArtifactType::Agent, agent_rel)];
    options.dependencies = roots(deps);
    Manifest::scaffold(options).write(&root).unwrap();

    PackageArchive::pack(&root).unwrap().1
}
