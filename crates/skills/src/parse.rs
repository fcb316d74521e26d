//! SKILL.md and script-header parsing.

use std::path::Path;

use {anyhow::Result, serde::Deserialize};

use crate::types::{ScriptMetadata, ScriptParameter, SkillContent, SkillMetadata};

#[derive(Debug, Deserialize)]
struct Frontmatter {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    env_vars: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Validate a skill name: 1-64 lowercase alphanumeric/hyphen chars.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Parse a SKILL.md document into metadata + body, enriching with script
/// metadata discovered under `<skill_dir>/scripts/`.
pub fn parse_skill(content: &str, skill_dir: &Path) -> Result<SkillContent> {
    let (frontmatter, body) = split_frontmatter(content)
        .ok_or_else(|| anyhow::anyhow!("SKILL.md missing frontmatter fences"))?;

    let parsed: Frontmatter = serde_yaml::from_str(frontmatter)
        .map_err(|e| anyhow::anyhow!("invalid SKILL.md frontmatter: {e}"))?;

    if !validate_name(&parsed.name) {
        anyhow::bail!(
            "invalid skill name '{}': must be 1-64 lowercase alphanumeric/hyphen chars",
            parsed.name
        );
    }

    let mut metadata = SkillMetadata {
        name: parsed.name,
        description: parsed.description,
        env_vars: parsed.env_vars,
        tags: parsed.tags,
        scripts: Vec::new(),
        resources: Vec::new(),
        path: skill_dir.to_path_buf(),
    };

    metadata.scripts = discover_scripts(skill_dir);
    metadata.resources = list_resources(skill_dir);

    Ok(SkillContent {
        metadata,
        body: body.trim_start().to_string(),
    })
}

fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches(['-', '\n']);
    Some((frontmatter, body))
}

fn discover_scripts(skill_dir: &Path) -> Vec<ScriptMetadata> {
    let scripts_dir = skill_dir.join("scripts");
    let Ok(entries) = std::fs::read_dir(&scripts_dir) else {
        return Vec::new();
    };

    let mut scripts: Vec<ScriptMetadata> = entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "py"))
        .filter_map(|e| {
            let path = e.path();
            let source = std::fs::read_to_string(&path).ok()?;
            let name = path.file_stem()?.to_str()?.to_string();
            let mut meta = parse_script_header(&source);
            meta.name = name;
            meta.path = path;
            Some(meta)
        })
        .collect();
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    scripts
}

fn list_resources(skill_dir: &Path) -> Vec<String> {
    let resources_dir = skill_dir.join("resources");
    let Ok(entries) = std::fs::read_dir(&resources_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Parse the structured comment header of a script:
///
/// ```text
/// # description: Fetch a page and convert to markdown
/// # param: url (string, required) Page URL to fetch
/// # param: timeout (integer) Request timeout in seconds
/// # returns: JSON object with `title` and `markdown`
/// # usage: fetch_page --url https://example.com
/// # env: CRAWL_USER_AGENT
/// ```
pub fn parse_script_header(source: &str) -> ScriptMetadata {
    let mut meta = ScriptMetadata::default();

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix('#') else {
            // Header ends at the first non-comment line.
            break;
        };
        let comment = comment.trim();

        if let Some(rest) = comment.strip_prefix("description:") {
            meta.description = rest.trim().to_string();
        } else if let Some(rest) = comment.strip_prefix("param:") {
            if let Some(param) = parse_param_line(rest.trim()) {
                meta.parameters.push(param);
            }
        } else if let Some(rest) = comment.strip_prefix("returns:") {
            meta.returns = rest.trim().to_string();
        } else if let Some(rest) = comment.strip_prefix("usage:") {
            meta.usage = rest.trim().to_string();
        } else if let Some(rest) = comment.strip_prefix("env:") {
            meta.env_vars = rest
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
    }

    meta
}

/// `name (type, required) description` — type and required are optional.
fn parse_param_line(line: &str) -> Option<ScriptParameter> {
    let mut param = ScriptParameter::default();

    let (name, rest) = match line.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    if name.is_empty() {
        return None;
    }
    param.name = name.to_string();

    let rest = if let Some(stripped) = rest.strip_prefix('(') {
        let (spec, description) = stripped.split_once(')')?;
        for part in spec.split(',') {
            let part = part.trim();
            if part == "required" {
                param.required = true;
            } else if !part.is_empty() {
                param.kind = part.to_string();
            }
        }
        description.trim()
    } else {
        rest
    };
    param.description = rest.to_string();

    Some(param)
}
