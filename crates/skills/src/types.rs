use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One parameter of a skill script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptParameter {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Metadata for one script inside a skill, parsed from the script header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ScriptParameter>,
    #[serde(default)]
    pub returns: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub env_vars: Vec<String>,
    /// Filesystem path to the script.
    #[serde(skip)]
    pub path: PathBuf,
}

/// Lightweight metadata parsed from SKILL.md frontmatter.
/// Loaded at startup for all discovered skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    /// Skill name — lowercase, hyphens allowed, 1-64 chars.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Env vars the skill's scripts expect.
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Scripts under `scripts/`, discovered alongside the SKILL.md.
    #[serde(default)]
    pub scripts: Vec<ScriptMetadata>,
    /// Resource file names under `resources/`.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Filesystem path to the skill directory.
    #[serde(skip)]
    pub path: PathBuf,
}

/// Full skill content: metadata + markdown body, loaded on demand.
#[derive(Debug, Clone)]
pub struct SkillContent {
    pub metadata: SkillMetadata,
    pub body: String,
}
