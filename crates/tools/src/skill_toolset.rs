//! Skills toolset: exposes the discovered skills as agent tools and runs
//! skill scripts in the shared sandbox.
//!
//! Scripts execute with the host environment plus the identities of the
//! current request materialized as env vars, so an OAuth token sent with
//! one request is visible to its skill executions and to nothing else.

use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use {
    agentry_agents::{AgentTool, Toolset},
    agentry_context::get_identity_env,
    agentry_sandbox::Sandbox,
    agentry_skills::{InMemoryRegistry, SkillMetadata},
};

/// Toolset exposing `list_skills`, `load_skill`, `read_skill_resource`,
/// and `run_skill_script`.
pub struct SkillsToolset {
    registry: Arc<InMemoryRegistry>,
    sandbox: Arc<dyn Sandbox>,
}

impl SkillsToolset {
    pub fn new(registry: Arc<InMemoryRegistry>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { registry, sandbox }
    }

    pub fn skills(&self) -> Vec<SkillMetadata> {
        self.registry.metadata()
    }

    /// Route a `skills__<name>` / `skill__<name>` tool call, as used by
    /// the code-execution toolset and the tool-call proxy.
    pub async fn call(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let bare = tool_name
            .strip_prefix("skills__")
            .or_else(|| tool_name.strip_prefix("skill__"))
            .unwrap_or(tool_name);

        match bare {
            "list_skills" => self.list_skills(),
            "load_skill" => {
                self.load_skill(arguments["skill_name"].as_str().unwrap_or_default())
                    .await
            },
            "read_skill_resource" => {
                self.read_skill_resource(
                    arguments["skill_name"].as_str().unwrap_or_default(),
                    arguments["resource_name"].as_str().unwrap_or_default(),
                )
                .await
            },
            "run_skill_script" => {
                let args: Vec<String> = arguments["args"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                self.run_skill_script(
                    arguments["skill_name"].as_str().unwrap_or_default(),
                    arguments["script_name"].as_str().unwrap_or_default(),
                    &args,
                )
                .await
            },
            other => anyhow::bail!("unknown skill tool: {other}"),
        }
    }

    fn list_skills(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.registry.metadata())?)
    }

    async fn load_skill(&self, skill_name: &str) -> Result<Value> {
        use agentry_skills::SkillRegistry;
        let content = self.registry.load_skill(skill_name).await?;
        Ok(Value::String(content.body))
    }

    async fn read_skill_resource(&self, skill_name: &str, resource_name: &str) -> Result<Value> {
        let skill = self
            .registry
            .metadata()
            .into_iter()
            .find(|s| s.name == skill_name)
            .ok_or_else(|| anyhow::anyhow!("skill '{skill_name}' not found"))?;

        if !skill.resources.iter().any(|r| r == resource_name) {
            anyhow::bail!("resource '{resource_name}' not found in skill '{skill_name}'");
        }
        let path = skill.path.join("resources").join(resource_name);
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Value::String(content))
    }

    /// Run one skill script inside the sandbox and return its structured
    /// result (`success`, `output`, `exit_code`, `error`, `execution_time`).
    pub async fn run_skill_script(
        &self,
        skill_name: &str,
        script_name: &str,
        args: &[String],
    ) -> Result<Value> {
        let skill = self
            .registry
            .metadata()
            .into_iter()
            .find(|s| s.name == skill_name)
            .ok_or_else(|| anyhow::anyhow!("skill '{skill_name}' not found"))?;
        let script = skill
            .scripts
            .iter()
            .find(|s| s.name == script_name)
            .ok_or_else(|| {
                anyhow::anyhow!("script '{script_name}' not found in skill '{skill_name}'")
            })?;

        let identity_env = get_identity_env();
        info!(
            skill = %skill_name,
            script = %script_name,
            identity_vars = identity_env.len(),
            "running skill script"
        );

        let code = build_script_runner(
            &script.path.to_string_lossy(),
            args,
            &identity_env,
        );
        let result = self.sandbox.run_code(&code, None).await;

        if result.infrastructure_error {
            anyhow::bail!(
                "sandbox failure running skill script: {}",
                result.error.unwrap_or_default()
            );
        }

        // The runner prints exactly one JSON document on its last line.
        let last_line = result.output.lines().last().unwrap_or_default();
        match serde_json::from_str::<Value>(last_line) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                warn!(skill = %skill_name, script = %script_name, "script produced no result document");
                Ok(json!({
                    "success": result.ok,
                    "output": result.output,
                    "exit_code": if result.ok { 0 } else { 1 },
                    "error": result.error,
                    "execution_time": 0.0,
                }))
            },
        }
    }
}

/// Python snippet that executes a script as a subprocess with the
/// identity env merged in, emitting a structured result document.
fn build_script_runner(
    script_path: &str,
    args: &[String],
    identity_env: &std::collections::HashMap<String, String>,
) -> String {
    // Double-encoded: the inner JSON document becomes a quoted string
    // literal the snippet feeds to json.loads.
    let args_literal = encode_literal(&serde_json::to_string(args).unwrap_or_else(|_| "[]".into()));
    let env_literal =
        encode_literal(&serde_json::to_string(identity_env).unwrap_or_else(|_| "{}".into()));
    let path_literal = encode_literal(script_path);
    format!(
        r#"import json, os, subprocess, sys, time
_env = dict(os.environ)
_env.update(json.loads({env_literal}))
_args = json.loads({args_literal})
_start = time.time()
_proc = subprocess.run([sys.executable, {path_literal}] + _args, capture_output=True, text=True, env=_env)
print(json.dumps({{
    "success": _proc.returncode == 0,
    "output": _proc.stdout,
    "exit_code": _proc.returncode,
    "error": _proc.stderr if _proc.returncode != 0 else None,
    "execution_time": time.time() - _start,
}}))
"#
    )
}

/// Encode a Rust string as a quoted literal valid in both JSON and Python.
fn encode_literal(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

// ── Agent tools ─────────────────────────────────────────────────────

macro_rules! skill_tool {
    ($tool:ident, $name:literal, $description:literal, $schema:expr) => {
        struct $tool {
            toolset: Arc<SkillsToolset>,
        }

        #[async_trait]
        impl AgentTool for $tool {
            fn name(&self) -> &str {
                $name
            }
            fn description(&self) -> &str {
                $description
            }
            fn parameters_schema(&self) -> Value {
                $schema
            }
            async fn execute(&self, params: Value) -> Result<Value> {
                self.toolset.call($name, params).await
            }
        }
    };
}

skill_tool!(
    ListSkillsTool,
    "list_skills",
    "List the installed skills with their scripts and parameters.",
    json!({"type": "object", "properties": {}})
);

skill_tool!(
    LoadSkillTool,
    "load_skill",
    "Load the full SKILL.md documentation for a skill.",
    json!({
        "type": "object",
        "required": ["skill_name"],
        "properties": {
            "skill_name": {"type": "string", "description": "Skill to load"}
        }
    })
);

skill_tool!(
    ReadSkillResourceTool,
    "read_skill_resource",
    "Read a resource file bundled with a skill.",
    json!({
        "type": "object",
        "required": ["skill_name", "resource_name"],
        "properties": {
            "skill_name": {"type": "string"},
            "resource_name": {"type": "string"}
        }
    })
);

skill_tool!(
    RunSkillScriptTool,
    "run_skill_script",
    "Execute a skill script with CLI-style arguments.",
    json!({
        "type": "object",
        "required": ["skill_name", "script_name"],
        "properties": {
            "skill_name": {"type": "string"},
            "script_name": {"type": "string"},
            "args": {"type": "array", "items": {"type": "string"}}
        }
    })
);

impl Toolset for Arc<SkillsToolset> {
    fn id(&self) -> &str {
        "skills"
    }

    fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        vec![
            Arc::new(ListSkillsTool {
                toolset: Arc::clone(self),
            }),
            Arc::new(LoadSkillTool {
                toolset: Arc::clone(self),
            }),
            Arc::new(ReadSkillResourceTool {
                toolset: Arc::clone(self),
            }),
            Arc::new(RunSkillScriptTool {
                toolset: Arc::clone(self),
            }),
        ]
    }
}
