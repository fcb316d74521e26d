//! System-prompt section describing the installed skills.
//!
//! Gives the model full visibility into the skill catalog — scripts,
//! parameters, return values, env vars, and a worked example — so it can
//! call `run_skill` correctly without a discovery round-trip.

use crate::types::SkillMetadata;

/// Render the skills section for the system prompt. Empty when no skills
/// are installed.
pub fn generate_skills_prompt_section(skills: &[SkillMetadata]) -> String {
    if skills.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push("## Available Skills".into());
    lines.push(String::new());
    lines.push(
        "You have access to pre-built **skills** alongside MCP tools. Skills are \
         domain-specific scripts you can run via `execute_code`."
            .into(),
    );
    lines.push(String::new());
    lines.push("### Skill Functions".into());
    lines.push("Import in execute_code with:".into());
    lines.push(
        "```python\nfrom generated.skills import list_skills, load_skill, run_skill, \
         read_skill_resource\n```"
            .into(),
    );
    lines.push(String::new());
    lines.push("| Function | Signature | Purpose |".into());
    lines.push("|---|---|---|".into());
    lines.push(
        "| `list_skills` | `await list_skills()` → `list[dict]` | Returns full catalog \
         with parameter details |"
            .into(),
    );
    lines.push(
        "| `load_skill` | `await load_skill(skill_name)` → `str` | Returns SKILL.md \
         documentation |"
            .into(),
    );
    lines.push(
        "| `run_skill` | `await run_skill(skill_name, script_name, args)` → `dict` | \
         Execute a script. `args` is a list of CLI-style strings, e.g. \
         `[\"--org\", \"acme\"]`. Result dict has keys: `success`, `output`, \
         `exit_code`, `error`, `execution_time` |"
            .into(),
    );
    lines.push(
        "| `read_skill_resource` | `await read_skill_resource(skill_name, resource_name)` \
         → `str` | Read a resource file |"
            .into(),
    );
    lines.push(String::new());

    lines.push("### Installed Skills".into());
    lines.push(String::new());

    for skill in skills {
        lines.push(format!("#### `{}`", skill.name));
        if !skill.description.is_empty() {
            lines.push(skill.description.clone());
        }
        lines.push(String::new());

        if !skill.scripts.is_empty() {
            lines.push("**Scripts:**".into());
            lines.push(String::new());
            for script in &skill.scripts {
                let mut entry = format!("- **`{}`**", script.name);
                if !script.description.is_empty() {
                    entry.push_str(&format!(" — {}", script.description));
                }
                lines.push(entry);

                if !script.parameters.is_empty() {
                    let parts: Vec<String> = script
                        .parameters
                        .iter()
                        .map(|p| {
                            let mut part = format!("`--{}`", p.name);
                            if !p.kind.is_empty() {
                                part.push_str(&format!(
                                    " ({}{})",
                                    p.kind,
                                    if p.required { ", required" } else { "" }
                                ));
                            }
                            if !p.description.is_empty() {
                                part.push_str(&format!(": {}", p.description));
                            }
                            part
                        })
                        .collect();
                    lines.push(format!("  Parameters: {}", parts.join(" | ")));
                }
                if !script.returns.is_empty() {
                    lines.push(format!("  Returns: {}", script.returns));
                }
                if !script.usage.is_empty() {
                    lines.push(format!("  Usage: `{}`", script.usage));
                }
                if !script.env_vars.is_empty() {
                    let vars: Vec<String> =
                        script.env_vars.iter().map(|v| format!("`{v}`")).collect();
                    lines.push(format!("  Env vars: {}", vars.join(", ")));
                }
            }
            lines.push(String::new());
        }

        if !skill.resources.is_empty() {
            let names: Vec<String> = skill.resources.iter().map(|r| format!("`{r}`")).collect();
            lines.push(format!("**Resources:** {}", names.join(", ")));
            lines.push(String::new());
        }
    }

    // Worked example from the first skill that has a script.
    if let Some((skill, script)) = skills
        .iter()
        .find_map(|s| s.scripts.first().map(|script| (s, script)))
    {
        let args = script
            .parameters
            .iter()
            .take(2)
            .flat_map(|p| [format!("\"--{}\"", p.name), format!("\"<{}>\"", p.name)])
            .collect::<Vec<_>>()
            .join(", ");

        lines.push("### Example".into());
        lines.push("```python".into());
        lines.push("from generated.skills import run_skill".into());
        lines.push(String::new());
        lines.push(format!(
            "result = await run_skill(\"{}\", \"{}\", [{args}])",
            skill.name, script.name
        ));
        lines.push("if result[\"success\"]:".into());
        lines.push("    print(result[\"output\"])".into());
        lines.push("else:".into());
        lines.push("    print(f\"Error: {result['error']}\")".into());
        lines.push("```".into());
        lines.push(String::new());
    }

    lines.join("\n")
}
