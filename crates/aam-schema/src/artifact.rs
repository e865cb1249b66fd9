//! Artifact kinds and target platforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of agent artifact carried by a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    /// A skill directory (marked by `SKILL.md`).
    Skill,
    /// An agent definition.
    Agent,
    /// A reusable prompt.
    Prompt,
    /// An instruction file.
    #[serde(alias = "instructions")]
    Instruction,
}

impl ArtifactType {
    /// All artifact types, in a stable order.
    pub const ALL: [Self; 4] = [Self::Skill, Self::Agent, Self::Prompt, Self::Instruction];

    /// Lowercase name as used in manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Prompt => "prompt",
            Self::Instruction => "instruction",
        }
    }

    /// Conventional plural directory name (`skills`, `agents`, ...).
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Agent => "agents",
            Self::Prompt => "prompts",
            Self::Instruction => "instructions",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supported AI platform that artifacts can be deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Cursor editor.
    Cursor,
    /// Claude.
    Claude,
    /// GitHub Copilot.
    Copilot,
    /// OpenAI Codex.
    Codex,
}

impl Platform {
    /// All platforms, in a stable order.
    pub const ALL: [Self; 4] = [Self::Cursor, Self::Claude, Self::Copilot, Self::Codex];

    /// Lowercase name as used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::Claude => "claude",
            Self::Copilot => "copilot",
            Self::Codex => "codex",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown platform '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("Claude".parse::<Platform>().unwrap(), Platform::Claude);
        assert!("emacs".parse::<Platform>().is_err());
    }

    #[test]
    fn instruction_accepts_plural_alias() {
        let t: ArtifactType = serde_yaml::from_str("instructions").unwrap();
        assert_eq!(t, ArtifactType::Instruction);
    }
}
