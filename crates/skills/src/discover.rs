//! Skill discovery: walk a root directory for SKILL.md files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{parse::parse_skill, types::SkillMetadata};

/// Discover all skills under `root`, one per directory containing a
/// SKILL.md. Unparseable skills are logged and skipped.
pub fn discover_skills(root: &Path) -> Vec<SkillMetadata> {
    let mut skill_dirs = Vec::new();
    collect_skill_dirs(root, &mut skill_dirs, 0);

    let mut skills: Vec<SkillMetadata> = skill_dirs
        .into_iter()
        .filter_map(|dir| {
            let skill_md = dir.join("SKILL.md");
            let content = match std::fs::read_to_string(&skill_md) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %skill_md.display(), error = %e, "failed to read SKILL.md");
                    return None;
                },
            };
            match parse_skill(&content, &dir) {
                Ok(parsed) => Some(parsed.metadata),
                Err(e) => {
                    warn!(path = %skill_md.display(), error = %e, "failed to parse skill");
                    None
                },
            }
        })
        .collect();

    skills.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(root = %root.display(), count = skills.len(), "discovered skills");
    skills
}

fn collect_skill_dirs(dir: &Path, out: &mut Vec<PathBuf>, depth: usize) {
    // Skill trees are shallow; a depth cap keeps symlink cycles harmless.
    if depth > 6 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join("SKILL.md").is_file() {
            out.push(path);
        } else {
            collect_skill_dirs(&path, out, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: test skill\n---\nBody.\n"),
        )
        .unwrap();
    }

    #[test]
    fn discovers_nested_skills_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "zeta");
        write_skill(&tmp.path().join("group"), "alpha");

        let skills = discover_skills(tmp.path());
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "alpha");
        assert_eq!(skills[1].name, "zeta");
    }

    #[test]
    fn broken_skill_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "good");
        let bad = tmp.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("SKILL.md"), "no frontmatter here").unwrap();

        let skills = discover_skills(tmp.path());
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "good");
    }

    #[test]
    fn missing_root_is_empty() {
        let skills = discover_skills(Path::new("/nonexistent/skills/root"));
        assert!(skills.is_empty());
    }
}
