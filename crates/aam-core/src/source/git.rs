//! Thin wrapper over the installed `git` client.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Run git and return its raw stdout.
pub(crate) async fn run_git_bytes(args: &[&str], cwd: Option<&Path>) -> Result<Vec<u8>> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!(args = %args.join(" "), cwd = ?cwd, "git");
    let out = cmd.output().await.map_err(|e| Error::Git {
        args: args.join(" "),
        stderr: format!("failed to execute git: {e}"),
    })?;

    if !out.status.success() {
        return Err(Error::Git {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(out.stdout)
}

/// Run git and return its trimmed stdout as text.
pub(crate) async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let stdout = run_git_bytes(args, cwd).await?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

/// Resolve a revision expression to a full commit id.
pub(crate) async fn rev_parse(repo: &Path, rev: &str) -> Result<String> {
    let spec = format!("{rev}^{{commit}}");
    run_git(&["rev-parse", "--verify", &spec], Some(repo)).await
}

/// Paths tracked at `rev`, restricted to `subdir` when given.
pub(crate) async fn ls_tree(repo: &Path, rev: &str, subdir: Option<&str>) -> Result<Vec<String>> {
    let mut args = vec!["ls-tree", "-r", "--name-only", rev];
    if let Some(dir) = subdir {
        args.push("--");
        args.push(dir);
    }
    let out = run_git(&args, Some(repo)).await?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Paths that differ between two revisions.
pub(crate) async fn changed_paths(
    repo: &Path,
    from: &str,
    to: &str,
    subdir: Option<&str>,
) -> Result<Vec<String>> {
    let mut args = vec!["diff", "--name-only", from, to];
    if let Some(dir) = subdir {
        args.push("--");
        args.push(dir);
    }
    let out = run_git(&args, Some(repo)).await?;
    Ok(out.lines().map(str::to_string).collect())
}
