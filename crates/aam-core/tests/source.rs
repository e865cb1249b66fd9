//! Source store and source-backed installs against a local git repository.
//!
//! Skipped when no `git` executable is available.

mod common;

use std::fs;
use std::path::Path;
use std::process::Command;

use aam_core::config::SourceConfig;
use aam_core::ops::{self, Context, UpgradeOptions};
use aam_core::resolver::Provenance;
use aam_core::source::SourceStore;
use aam_core::{LockManager, NullReporter};
use aam_schema::ArtifactType;

use common::{TestEnv, name, roots};

fn git_available() -> bool {
    which::which("git").is_ok()
}

fn git(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(repo)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// An origin repository with one skill and one agent on `main`.
fn origin(dir: &Path) -> String {
    fs::create_dir_all(dir.join("skills/code-review")).unwrap();
    fs::create_dir_all(dir.join("agents")).unwrap();
    fs::write(dir.join("skills/code-review/SKILL.md"), "# Code review\n").unwrap();
    fs::write(dir.join("agents/triage.md"), "You triage issues.\n").unwrap();
    fs::write(dir.join("README.md"), "Team artifacts\n").unwrap();
    git(dir, &["init", "--quiet"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
    git(dir, &["branch", "-M", "main"]);
    git(dir, &["rev-parse", "HEAD"])
}

fn commit_change(dir: &Path, rel: &str, content: &str) -> String {
    fs::write(dir.join(rel), content).unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "--quiet", "-m", "update"]);
    git(dir, &["rev-parse", "HEAD"])
}

fn source_env() -> (TestEnv, SourceConfig, String) {
    let env = TestEnv::new();
    let repo = env.temp.path().join("origin");
    let head = origin(&repo);
    let source = SourceConfig::new("team", repo.to_string_lossy());
    (env, source, head)
}

fn context(env: &TestEnv, source: &SourceConfig) -> Context {
    let config = env.config().with_source(source.clone());
    Context::new(config, std::sync::Arc::new(NullReporter)).unwrap()
}

#[tokio::test]
async fn sync_scan_and_diff() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let (env, source, head) = source_env();
    let store = SourceStore::new(&env.config());

    let first = store.sync(&source).await.unwrap();
    assert!(first.cloned);
    assert_eq!(first.revision, head);
    assert_eq!(store.last_revision("team").unwrap().as_deref(), Some(head.as_str()));

    let found = store.scan(&source).unwrap();
    let kinds: Vec<_> = found.iter().map(|c| (c.name.as_str(), c.kind)).collect();
    assert_eq!(
        kinds,
        [("code-review", ArtifactType::Skill), ("triage", ArtifactType::Agent)]
    );

    let origin_dir = env.temp.path().join("origin");
    commit_change(&origin_dir, "skills/code-review/SKILL.md", "# Code review v2\n");
    fs::write(origin_dir.join("agents/planner.md"), "You plan.\n").unwrap();
    let new_head = commit_change(&origin_dir, "agents/triage.md", "You triage bugs.\n");

    let second = store.sync(&source).await.unwrap();
    assert!(!second.cloned);
    assert!(second.changed());
    assert_eq!(second.previous.as_deref(), Some(head.as_str()));
    assert_eq!(second.revision, new_head);

    let diff = store.diff(&source, &head).await.unwrap();
    let added: Vec<_> = diff.added.iter().map(|c| c.name.as_str()).collect();
    let changed: Vec<_> = diff.changed.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(added, ["planner"]);
    assert_eq!(changed, ["code-review", "triage"]);
    assert!(diff.removed.is_empty());
}

#[tokio::test]
async fn installs_and_upgrades_source_artifacts() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let (env, source, head) = source_env();
    let ctx = context(&env, &source);
    let skill = name("@team/code-review");

    let report = ops::install(&ctx, &roots(&[("@team/code-review", "*")]))
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failed);
    let committed = report.committed(&skill).unwrap();
    assert_eq!(committed.provenance.revision(), Some(head.as_str()));

    let lock = LockManager::new(env.lock_path()).read().unwrap();
    let entry = lock.get(&skill).unwrap();
    assert!(matches!(entry.provenance, Provenance::Source { ref path, .. } if path == "skills/code-review"));
    let deployed = env.project.join(&entry.files[0].path);
    assert_eq!(fs::read_to_string(&deployed).unwrap(), "# Code review\n");

    // Re-planning against the same revision changes nothing.
    assert!(ops::diff_lock(&ctx).await.unwrap().is_empty());

    let new_head = commit_change(
        &env.temp.path().join("origin"),
        "skills/code-review/SKILL.md",
        "# Code review v2\n",
    );
    let drift = ops::outdated(&ctx).await.unwrap();
    assert_eq!(drift.outdated.len(), 1);
    assert_eq!(drift.outdated[0].latest_revision.as_deref(), Some(new_head.as_str()));

    let upgraded = ops::upgrade(&ctx, &UpgradeOptions::default()).await.unwrap();
    let committed = upgraded.committed(&skill).unwrap();
    assert_eq!(committed.provenance.revision(), Some(new_head.as_str()));
    assert_eq!(fs::read_to_string(&deployed).unwrap(), "# Code review v2\n");
}

#[tokio::test]
async fn range_constraint_on_source_package_fails() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let (env, source, _) = source_env();
    let ctx = context(&env, &source);

    let err = ops::plan(&ctx, &roots(&[("@team/triage", "^1.0.0")]), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), aam_core::ErrorKind::ResolutionConflict);
}
