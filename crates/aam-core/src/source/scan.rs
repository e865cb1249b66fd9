//! Best-effort artifact detection over a source's file list.
//!
//! Detection works on `/`-separated relative paths so the same rules apply to
//! a working tree walk and to `git ls-tree` output.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use aam_schema::ArtifactType;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::package::archive_path;

/// Marker file that turns its directory into a skill.
pub const SKILL_MARKER: &str = "SKILL.md";

const SUFFIXES: &[(&str, ArtifactType)] = &[
    (".agent.md", ArtifactType::Agent),
    (".prompt.md", ArtifactType::Prompt),
    (".instructions.md", ArtifactType::Instruction),
];

/// An artifact detected in a source but not yet packaged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Candidate {
    /// Package-safe name derived from the path.
    pub name: String,
    pub kind: ArtifactType,
    /// Path relative to the scanned root: a directory for skills, a file otherwise.
    pub path: String,
}

/// Classify a single file path (not a skill marker).
pub fn classify(path: &str) -> Option<ArtifactType> {
    let file_name = path.rsplit('/').next()?;
    if file_name.starts_with('.') {
        return None;
    }
    let lower = file_name.to_lowercase();
    if let Some((_, kind)) = SUFFIXES.iter().find(|(suffix, _)| lower.ends_with(suffix)) {
        return Some(*kind);
    }
    if !lower.ends_with(".md") || lower == "readme.md" {
        return None;
    }
    let mut dirs = path.split('/').rev().skip(1);
    dirs.find_map(|dir| match dir {
        "agents" => Some(ArtifactType::Agent),
        "prompts" => Some(ArtifactType::Prompt),
        "instructions" => Some(ArtifactType::Instruction),
        _ => None,
    })
}

/// Detect candidates among relative file paths. Output is sorted.
///
/// A directory containing `SKILL.md` is one skill; files beneath it are not
/// classified on their own. A `SKILL.md` at the root itself is ignored.
///
/// Names are unique. Artifacts sharing a file stem are told apart by kind
/// (`review-agent`, `review-prompt`), then by directory path.
pub fn detect<I, S>(paths: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let paths: Vec<String> = paths
        .into_iter()
        .map(|p| p.as_ref().trim_start_matches("./").to_string())
        .filter(|p| !p.is_empty() && !p.split('/').any(|seg| seg == ".git"))
        .collect();

    let skill_dirs: BTreeSet<String> = paths
        .iter()
        .filter_map(|p| match p.rsplit_once('/') {
            Some((dir, SKILL_MARKER)) => Some(dir.to_string()),
            _ => None,
        })
        .collect();

    let inside_skill = |p: &str| {
        skill_dirs
            .iter()
            .any(|dir| p.starts_with(&format!("{dir}/")))
    };

    let mut found: BTreeSet<Candidate> = skill_dirs
        .iter()
        .map(|dir| Candidate {
            name: candidate_name(dir.rsplit('/').next().unwrap_or(dir)),
            kind: ArtifactType::Skill,
            path: dir.clone(),
        })
        .collect();

    for path in &paths {
        if inside_skill(path) {
            continue;
        }
        if let Some(kind) = classify(path) {
            found.insert(Candidate {
                name: candidate_name(strip_kind_suffix(path.rsplit('/').next().unwrap_or(path))),
                kind,
                path: path.clone(),
            });
        }
    }

    let mut found: Vec<Candidate> = found.into_iter().collect();
    rename_duplicates(&mut found, |c, _| format!("{}-{}", c.name, c.kind));
    rename_duplicates(&mut found, |c, _| path_stem(&c.path).replace('/', "-"));
    while rename_duplicates(&mut found, |c, n| format!("{}-{}", c.name, n + 1)) {}
    found.sort();
    found
}

/// Rename every candidate whose name is shared with another. `rename` gets
/// the candidate and its position among those sharing the name. Returns
/// whether anything was renamed.
fn rename_duplicates(found: &mut [Candidate], rename: impl Fn(&Candidate, usize) -> String) -> bool {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, candidate) in found.iter().enumerate() {
        groups.entry(candidate.name.clone()).or_default().push(i);
    }
    let mut renamed = false;
    for indices in groups.values().filter(|g| g.len() > 1) {
        for (n, &i) in indices.iter().enumerate() {
            found[i].name = candidate_name(&rename(&found[i], n));
            renamed = true;
        }
    }
    renamed
}

/// `path` without its artifact suffix or extension.
fn path_stem(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/{}", strip_kind_suffix(file)),
        None => strip_kind_suffix(path).to_string(),
    }
}

/// Walk a working tree and detect candidates in it.
pub fn scan_tree(root: &Path) -> Result<Vec<Candidate>> {
    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| Error::Other(format!("scan {}: {e}", root.display())))?;
        if entry.file_type().is_file()
            && let Ok(rel) = entry.path().strip_prefix(root)
        {
            paths.push(archive_path(rel));
        }
    }
    Ok(detect(paths))
}

fn strip_kind_suffix(file_name: &str) -> &str {
    let lower = file_name.to_lowercase();
    for (suffix, _) in SUFFIXES {
        if lower.ends_with(suffix) {
            return file_name
                .get(..file_name.len().saturating_sub(suffix.len()))
                .unwrap_or(file_name);
        }
    }
    file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem)
}

/// Lowercase, with anything outside `[a-z0-9._-]` replaced by `-` and runs
/// of `-` collapsed.
fn candidate_name(raw: &str) -> String {
    let mut mapped = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '-'
        };
        if !(c == '-' && mapped.ends_with('-')) {
            mapped.push(c);
        }
    }
    let trimmed = mapped.trim_start_matches(['-', '.', '_']);
    if trimmed.is_empty() {
        "artifact".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_suffix_and_directory() {
        assert_eq!(classify("x/review.agent.md"), Some(ArtifactType::Agent));
        assert_eq!(classify("summarize.prompt.md"), Some(ArtifactType::Prompt));
        assert_eq!(classify("a/b.instructions.md"), Some(ArtifactType::Instruction));
        assert_eq!(classify("agents/reviewer.md"), Some(ArtifactType::Agent));
        assert_eq!(classify("docs/prompts/x.md"), Some(ArtifactType::Prompt));
        assert_eq!(classify("agents/README.md"), None);
        assert_eq!(classify("src/main.rs"), None);
        assert_eq!(classify("notes.md"), None);
    }

    #[test]
    fn skill_directories_swallow_their_files() {
        let found = detect([
            "skills/code-review/SKILL.md",
            "skills/code-review/prompts/inner.md",
            "agents/Reviewer Bot.md",
            "prompts/summarize.prompt.md",
            ".git/config",
            "README.md",
        ]);
        assert_eq!(
            found,
            vec![
                Candidate {
                    name: "code-review".into(),
                    kind: ArtifactType::Skill,
                    path: "skills/code-review".into(),
                },
                Candidate {
                    name: "reviewer-bot".into(),
                    kind: ArtifactType::Agent,
                    path: "agents/Reviewer Bot.md".into(),
                },
                Candidate {
                    name: "summarize".into(),
                    kind: ArtifactType::Prompt,
                    path: "prompts/summarize.prompt.md".into(),
                },
            ]
        );
    }

    #[test]
    fn shared_stems_get_distinct_names() {
        let found = detect([
            "agents/review.agent.md",
            "prompts/review.prompt.md",
            "skills/review/SKILL.md",
            "team/agents/lint.md",
            "ops/agents/lint.md",
            "agents/Odd  Name.md",
        ]);
        let names: Vec<(&str, &str)> = found
            .iter()
            .map(|c| (c.name.as_str(), c.path.as_str()))
            .collect();
        assert_eq!(
            names,
            [
                ("odd-name", "agents/Odd  Name.md"),
                ("ops-agents-lint", "ops/agents/lint.md"),
                ("review-agent", "agents/review.agent.md"),
                ("review-prompt", "prompts/review.prompt.md"),
                ("review-skill", "skills/review"),
                ("team-agents-lint", "team/agents/lint.md"),
            ]
        );
        let unique: BTreeSet<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(unique.len(), found.len());
    }

    #[test]
    fn scan_walks_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("skills/lint")).unwrap();
        std::fs::write(dir.path().join("skills/lint/SKILL.md"), "# Lint").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/a.agent.md"), "nope").unwrap();

        let found = scan_tree(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ArtifactType::Skill);
        assert_eq!(found[0].path, "skills/lint");
    }
}
