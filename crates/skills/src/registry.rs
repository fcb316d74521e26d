use std::{collections::HashMap, path::Path};

use async_trait::async_trait;

use crate::{
    parse,
    types::{SkillContent, SkillMetadata},
};

/// Registry of discovered skills.
#[async_trait]
pub trait SkillRegistry: Send + Sync {
    /// List metadata for all available skills.
    async fn list_skills(&self) -> anyhow::Result<Vec<SkillMetadata>>;

    /// Load the full content of a skill by name.
    async fn load_skill(&self, name: &str) -> anyhow::Result<SkillContent>;
}

/// In-memory registry, populated from a discovery walk.
pub struct InMemoryRegistry {
    skills: HashMap<String, SkillMetadata>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Discover skills under `root` and keep only those in `selected`
    /// (empty selection keeps everything).
    pub fn from_root(root: &Path, selected: &[String]) -> Self {
        let mut skills = HashMap::new();
        for meta in crate::discover::discover_skills(root) {
            if selected.is_empty() || selected.contains(&meta.name) {
                skills.insert(meta.name.clone(), meta);
            }
        }
        Self { skills }
    }

    pub fn insert(&mut self, meta: SkillMetadata) {
        self.skills.insert(meta.name.clone(), meta);
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn metadata(&self) -> Vec<SkillMetadata> {
        let mut skills: Vec<SkillMetadata> = self.skills.values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SkillRegistry for InMemoryRegistry {
    async fn list_skills(&self) -> anyhow::Result<Vec<SkillMetadata>> {
        Ok(self.metadata())
    }

    async fn load_skill(&self, name: &str) -> anyhow::Result<SkillContent> {
        let meta = self
            .skills
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("skill '{name}' not found"))?;

        let skill_md = meta.path.join("SKILL.md");
        let content = tokio::fs::read_to_string(&skill_md).await?;
        parse::parse_skill(&content, &meta.path)
    }
}
