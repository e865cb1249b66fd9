//! Package manifest (`aam.yaml`) parsing, validation and scaffolding.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use aam_schema::{ArtifactType, Constraint, MANIFEST_FILE, PackageName, Platform, Version};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// One artifact declared by a package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactDecl {
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    /// Path relative to the manifest root, `/`-separated.
    pub path: String,
    /// Platforms this artifact targets. Empty means the configured defaults.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,
}

impl ArtifactDecl {
    pub fn new(kind: ArtifactType, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            platforms: Vec::new(),
        }
    }

    /// Platforms to deploy to, falling back to `defaults`.
    pub fn target_platforms(&self, defaults: &[Platform]) -> Vec<Platform> {
        if self.platforms.is_empty() {
            defaults.to_vec()
        } else {
            self.platforms.clone()
        }
    }
}

/// A package's declared identity, artifacts and dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: PackageName,
    pub version: Version,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Accepts `author: x` or `authors: [x, y]`.
    #[serde(
        default,
        alias = "author",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PackageName, Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactDecl>,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

/// Inputs gathered by an interactive `init` flow.
#[derive(Debug, Clone)]
pub struct ScaffoldOptions {
    pub name: PackageName,
    /// Defaults to `0.1.0`.
    pub version: Option<Version>,
    pub description: String,
    pub author: Option<String>,
    pub license: Option<String>,
    pub artifacts: Vec<ArtifactDecl>,
    pub dependencies: BTreeMap<PackageName, Constraint>,
}

impl ScaffoldOptions {
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            version: None,
            description: String::new(),
            author: None,
            license: None,
            artifacts: Vec::new(),
            dependencies: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Read and parse `aam.yaml` from a package root (or a direct file path).
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let content = fs::read_to_string(&file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ManifestInvalid {
                    path: file.clone(),
                    reason: format!("{MANIFEST_FILE} not found"),
                }
            } else {
                Error::io(&file, e)
            }
        })?;
        Self::parse(&content, &file)
    }

    /// Parse manifest YAML. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ManifestInvalid {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check the invariants that parsing alone cannot: artifact paths are
    /// relative, stay inside `root` and exist; no self-dependency.
    pub fn validate(&self, root: &Path) -> Result<()> {
        let origin = root.join(MANIFEST_FILE);
        let invalid = |reason: String| Error::ManifestInvalid {
            path: origin.clone(),
            reason,
        };

        if self.dependencies.contains_key(&self.name) {
            return Err(invalid(format!("{} depends on itself", self.name)));
        }

        for artifact in &self.artifacts {
            let rel = Path::new(&artifact.path);
            if artifact.path.trim().is_empty() {
                return Err(invalid(format!("{} artifact has an empty path", artifact.kind)));
            }
            if rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                return Err(invalid(format!(
                    "artifact path '{}' must be relative and stay inside the package",
                    artifact.path
                )));
            }
            if !root.join(rel).exists() {
                return Err(invalid(format!(
                    "artifact path '{}' does not exist",
                    artifact.path
                )));
            }
        }
        Ok(())
    }

    /// Build a manifest from already-gathered answers.
    ///
    /// Artifacts are sorted and de-duplicated by path.
    pub fn scaffold(options: ScaffoldOptions) -> Self {
        let mut artifacts = options.artifacts;
        artifacts.sort_by(|a, b| a.path.cmp(&b.path).then(a.kind.cmp(&b.kind)));
        artifacts.dedup_by(|a, b| a.path == b.path);

        Self {
            name: options.name,
            version: options.version.unwrap_or_else(|| Version::new(0, 1, 0)),
            description: options.description,
            authors: options.author.into_iter().collect(),
            license: options.license,
            dependencies: options.dependencies,
            artifacts,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Other(e.to_string()))
    }

    /// Write `aam.yaml` into `root`, returning the file path.
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(MANIFEST_FILE);
        fs::write(&path, self.to_yaml()?).at(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: "@acme/review"
version: 1.2.0
description: Code review helpers
author: Jane Doe
license: MIT
dependencies:
  dep-a: ^1.0.0
  "@acme/base": "*"
artifacts:
  - type: skill
    path: skills/review
    platforms: [claude, cursor]
  - type: prompt
    path: prompts/summarize.prompt.md
"#;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("skills/review")).unwrap();
        fs::write(root.join("skills/review/SKILL.md"), "# Review").unwrap();
        fs::create_dir_all(root.join("prompts")).unwrap();
        fs::write(root.join("prompts/summarize.prompt.md"), "Summarize").unwrap();
    }

    #[test]
    fn parses_sample_manifest() {
        let m = Manifest::parse(SAMPLE, Path::new("aam.yaml")).unwrap();
        assert_eq!(m.name.as_str(), "@acme/review");
        assert_eq!(m.version, Version::new(1, 2, 0));
        assert_eq!(m.authors, vec!["Jane Doe".to_string()]);
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.artifacts[0].platforms, vec![Platform::Claude, Platform::Cursor]);
        assert_eq!(
            m.artifacts[1].target_platforms(&[Platform::Codex]),
            vec![Platform::Codex]
        );
    }

    #[test]
    fn bad_version_is_manifest_invalid() {
        let err = Manifest::parse("name: x\nversion: one\n", Path::new("aam.yaml")).unwrap_err();
        assert!(matches!(err, Error::ManifestInvalid { .. }));
    }

    #[test]
    fn validate_checks_artifact_paths() {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::parse(SAMPLE, Path::new("aam.yaml")).unwrap();
        assert!(m.validate(dir.path()).is_err());

        write_tree(dir.path());
        m.validate(dir.path()).unwrap();
    }

    #[test]
    fn validate_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::scaffold(ScaffoldOptions::new(PackageName::parse("x").unwrap()));
        m.artifacts.push(ArtifactDecl::new(ArtifactType::Agent, "../outside.md"));
        let err = m.validate(dir.path()).unwrap_err();
        assert!(err.to_string().contains("stay inside"));
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::scaffold(ScaffoldOptions::new(PackageName::parse("x").unwrap()));
        m.dependencies
            .insert(PackageName::parse("x").unwrap(), Constraint::Any);
        assert!(m.validate(dir.path()).is_err());
    }

    #[test]
    fn scaffold_then_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let mut options = ScaffoldOptions::new(PackageName::parse("review").unwrap());
        options.author = Some("Jane".into());
        options.artifacts = vec![
            ArtifactDecl::new(ArtifactType::Skill, "skills/review"),
            ArtifactDecl::new(ArtifactType::Prompt, "prompts/summarize.prompt.md"),
            ArtifactDecl::new(ArtifactType::Skill, "skills/review"),
        ];
        let m = Manifest::scaffold(options);
        assert_eq!(m.version, Version::new(0, 1, 0));
        assert_eq!(m.artifacts.len(), 2);

        m.write(dir.path()).unwrap();
        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, m);
        loaded.validate(dir.path()).unwrap();
    }

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ManifestInvalid { .. }));
    }
}
