//! Code-execution toolset.
//!
//! Owns its own registry of provider tools: when code execution is
//! enabled the agent does not see MCP server tools directly — it gets
//! `execute_code` plus discovery tools (`search_tools`,
//! `get_tool_details`, `call_tool`) over this registry, and composes
//! providers programmatically inside the sandbox.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock, Weak},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use {
    agentry_agents::{AgentTool, ToolRegistry, Toolset},
    agentry_common::RwLockExt,
    agentry_sandbox::{ExecutionResult, Sandbox, ToolCaller},
};

/// Sandbox infrastructure failures are retried this many times; failures
/// in the executed code never are.
const MAX_INFRA_RETRIES: usize = 2;

/// Paths and wiring for the code-execution toolset.
#[derive(Debug, Clone, Default)]
pub struct CodeModeConfig {
    pub workspace_path: PathBuf,
    pub generated_path: PathBuf,
    pub skills_path: PathBuf,
    /// Set when the sandbox cannot reach provider subprocesses directly;
    /// generated bindings then call tools over HTTP through the host.
    pub tool_proxy_url: Option<String>,
    pub allow_direct_tool_calls: bool,
}

/// The code-execution toolset. Immutable once built; retooling replaces
/// the whole toolset rather than mutating it.
pub struct CodeModeToolset {
    registry: ToolRegistry,
    config: CodeModeConfig,
    sandbox: Arc<dyn Sandbox>,
    skill_caller: RwLock<Option<ToolCaller>>,
    discovery_enabled: bool,
}

impl CodeModeToolset {
    pub fn new(
        config: CodeModeConfig,
        sandbox: Arc<dyn Sandbox>,
        discovery_enabled: bool,
    ) -> Self {
        Self {
            registry: ToolRegistry::new(),
            config,
            sandbox,
            skill_caller: RwLock::new(None),
            discovery_enabled,
        }
    }

    /// Register provider tools into the toolset's own registry. Called at
    /// build time with the bridges of the selected running servers.
    pub fn register_tools(&mut self, tools: impl IntoIterator<Item = Arc<dyn AgentTool>>) {
        self.registry.register_all(tools);
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CodeModeConfig {
        &self.config
    }

    /// Route `skill__<name>` / `skills__<name>` calls to the skills
    /// toolset instead of the provider registry.
    pub fn set_skill_caller(&self, caller: ToolCaller) {
        *self.skill_caller.write_unpoisoned() = Some(caller);
    }

    /// Start the toolset: ensure the generated-code layout exists, write
    /// sandbox-side bindings, start the sandbox, and register the
    /// tool-call route back into it.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        std::fs::create_dir_all(&self.config.generated_path)?;
        self.generate_bindings()?;

        self.sandbox.start().await?;

        // The sandbox calls back through a weak handle; the toolset owns
        // the sandbox, so a strong capture would cycle.
        let weak: Weak<CodeModeToolset> = Arc::downgrade(self);
        let caller: ToolCaller = Arc::new(move |name: String, args: Value| {
            let weak = weak.clone();
            Box::pin(async move {
                let toolset = weak
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("code-execution toolset dropped"))?;
                toolset.call_tool(&name, args).await
            })
        });
        self.sandbox.register_tool_caller(caller).await;

        info!(
            tools = self.registry.len(),
            discovery = self.discovery_enabled,
            "code-execution toolset started"
        );
        Ok(())
    }

    /// Write the python bindings module generated code imports inside the
    /// sandbox. With a tool-proxy URL the bindings call the host over
    /// HTTP; without one they require a registered in-process caller.
    fn generate_bindings(&self) -> Result<()> {
        let proxy = self
            .config
            .tool_proxy_url
            .clone()
            .unwrap_or_default();
        let module = format!(
            r#"import json
import urllib.request

TOOL_PROXY_URL = {proxy:?}


def call_tool(toolset, tool_name, arguments):
    if not TOOL_PROXY_URL:
        raise RuntimeError("no tool proxy configured; tools are host-local")
    req = urllib.request.Request(
        f"{{TOOL_PROXY_URL}}/{{toolset}}/{{tool_name}}",
        data=json.dumps(arguments).encode(),
        headers={{"Content-Type": "application/json"}},
    )
    with urllib.request.urlopen(req) as resp:
        return json.loads(resp.read())
"#
        );
        let path = self.config.generated_path.join("tool_bindings.py");
        std::fs::write(&path, module)?;
        info!(path = %path.display(), "generated sandbox tool bindings");
        Ok(())
    }

    /// Execute code in the sandbox, retrying infrastructure failures.
    pub async fn execute_code(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        let mut attempt = 0usize;
        loop {
            let result = self.sandbox.run_code(code, timeout).await;
            if !result.infrastructure_error || attempt >= MAX_INFRA_RETRIES {
                return result;
            }
            attempt += 1;
            warn!(
                attempt,
                error = ?result.error,
                "sandbox infrastructure failure, retrying execution"
            );
        }
    }

    /// Invoke a tool by name: skills route to the skill caller, anything
    /// else resolves in the provider registry.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        if name.starts_with("skill__") || name.starts_with("skills__") {
            let caller = self.skill_caller.read_unpoisoned().clone();
            let Some(caller) = caller else {
                anyhow::bail!("no skills toolset wired for '{name}'");
            };
            return caller(name.to_string(), arguments).await;
        }

        let Some(tool) = self.registry.get(name) else {
            anyhow::bail!("unknown tool: {name}");
        };
        tool.execute(arguments).await
    }

    /// Case-insensitive substring search over tool names and descriptions.
    pub fn search_tools(&self, query: &str) -> Vec<Value> {
        let query = query.to_lowercase();
        let mut hits: Vec<Value> = self
            .registry
            .tool_names()
            .into_iter()
            .filter_map(|name| self.registry.get(&name).cloned())
            .filter(|tool| {
                query.is_empty()
                    || tool.name().to_lowercase().contains(&query)
                    || tool.description().to_lowercase().contains(&query)
            })
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                })
            })
            .collect();
        hits.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        hits
    }

    pub fn tool_details(&self, name: &str) -> Option<Value> {
        self.registry.get(name).map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters_schema(),
            })
        })
    }
}

// ── Agent tools ─────────────────────────────────────────────────────

struct ExecuteCodeTool {
    toolset: Arc<CodeModeToolset>,
}

#[async_trait]
impl AgentTool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute Python code in the sandbox. State persists across calls. \
         Use generated tool bindings or call_tool to reach MCP tools."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["code"],
            "properties": {
                "code": {"type": "string", "description": "Python code to execute"},
                "timeout": {"type": "number", "description": "Seconds before the execution is abandoned"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let code = params["code"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'code'"))?;
        let timeout = params["timeout"].as_f64().map(Duration::from_secs_f64);

        let result = self.toolset.execute_code(code, timeout).await;
        Ok(json!({
            "success": result.ok,
            "output": result.output,
            "error": result.error,
        }))
    }
}

struct SearchToolsTool {
    toolset: Arc<CodeModeToolset>,
}

#[async_trait]
impl AgentTool for SearchToolsTool {
    fn name(&self) -> &str {
        "search_tools"
    }

    fn description(&self) -> &str {
        "Search the available MCP tools by name or description."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Substring to search for"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or_default();
        Ok(Value::Array(self.toolset.search_tools(query)))
    }
}

struct GetToolDetailsTool {
    toolset: Arc<CodeModeToolset>,
}

#[async_trait]
impl AgentTool for GetToolDetailsTool {
    fn name(&self) -> &str {
        "get_tool_details"
    }

    fn description(&self) -> &str {
        "Get the full schema of one MCP tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string", "description": "Tool name"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'name'"))?;
        self.toolset
            .tool_details(name)
            .ok_or_else(|| anyhow::anyhow!("unknown tool: {name}"))
    }
}

struct CallToolTool {
    toolset: Arc<CodeModeToolset>,
}

#[async_trait]
impl AgentTool for CallToolTool {
    fn name(&self) -> &str {
        "call_tool"
    }

    fn description(&self) -> &str {
        "Invoke one MCP tool (or skill tool) by name with JSON arguments."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "arguments": {"type": "object"}
            }
        })
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let name = params["name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'name'"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        self.toolset.call_tool(name, arguments).await
    }
}

impl Toolset for Arc<CodeModeToolset> {
    fn id(&self) -> &str {
        "code-mode"
    }

    fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
        let mut tools: Vec<Arc<dyn AgentTool>> = vec![Arc::new(ExecuteCodeTool {
            toolset: Arc::clone(self),
        })];
        if self.discovery_enabled {
            tools.push(Arc::new(SearchToolsTool {
                toolset: Arc::clone(self),
            }));
            tools.push(Arc::new(GetToolDetailsTool {
                toolset: Arc::clone(self),
            }));
            tools.push(Arc::new(CallToolTool {
                toolset: Arc::clone(self),
            }));
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        agentry_sandbox::SandboxVariant,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Sandbox scripted per call.
    struct ScriptedSandbox {
        results: Mutex<Vec<ExecutionResult>>,
        executions: AtomicUsize,
    }

    impl ScriptedSandbox {
        fn new(results: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                executions: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        fn variant(&self) -> SandboxVariant {
            SandboxVariant::LocalEval
        }
        fn sandbox_id(&self) -> String {
            "scripted".into()
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn run_code(&self, _code: &str, _timeout: Option<Duration>) -> ExecutionResult {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                ExecutionResult::success("")
            } else {
                results.remove(0)
            }
        }
        async fn set_variable(&self, _name: &str, _value: &Value) -> ExecutionResult {
            ExecutionResult::success("")
        }
        async fn install_packages(
            &self,
            _packages: &[String],
            _timeout: Option<Duration>,
        ) -> ExecutionResult {
            ExecutionResult::success("")
        }
        async fn register_tool_caller(&self, _caller: ToolCaller) {}
        fn is_executing(&self) -> bool {
            false
        }
        async fn interrupt(&self) -> bool {
            false
        }
        fn has_capability(&self, _name: &str) -> bool {
            false
        }
    }

    struct FsTool;

    #[async_trait]
    impl AgentTool for FsTool {
        fn name(&self) -> &str {
            "fs_read_file"
        }
        fn description(&self) -> &str {
            "Read a file from the filesystem server"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"path": {"type": "string"}}})
        }
        async fn execute(&self, params: Value) -> Result<Value> {
            Ok(json!({"read": params["path"]}))
        }
    }

    fn toolset(sandbox: Arc<ScriptedSandbox>) -> Arc<CodeModeToolset> {
        let mut toolset = CodeModeToolset::new(
            CodeModeConfig::default(),
            sandbox as Arc<dyn Sandbox>,
            true,
        );
        toolset.register_tools([Arc::new(FsTool) as Arc<dyn AgentTool>]);
        Arc::new(toolset)
    }

    #[tokio::test]
    async fn infra_failures_are_retried_then_succeed() {
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionResult::infra_error("kernel gone"),
            ExecutionResult::infra_error("kernel still gone"),
            ExecutionResult::success("42"),
        ]);
        let toolset = toolset(Arc::clone(&sandbox));

        let result = toolset.execute_code("print(42)", None).await;
        assert!(result.ok);
        assert_eq!(sandbox.executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn infra_retries_are_bounded() {
        let sandbox = ScriptedSandbox::new(vec![
            ExecutionResult::infra_error("1"),
            ExecutionResult::infra_error("2"),
            ExecutionResult::infra_error("3"),
            ExecutionResult::infra_error("4"),
        ]);
        let toolset = toolset(Arc::clone(&sandbox));

        let result = toolset.execute_code("x", None).await;
        assert!(result.infrastructure_error);
        assert_eq!(sandbox.executions.load(Ordering::SeqCst), 1 + MAX_INFRA_RETRIES);
    }

    #[tokio::test]
    async fn code_failures_are_never_retried() {
        let sandbox = ScriptedSandbox::new(vec![ExecutionResult::code_error("", "NameError")]);
        let toolset = toolset(Arc::clone(&sandbox));

        let result = toolset.execute_code("x", None).await;
        assert!(!result.ok);
        assert_eq!(sandbox.executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn discovery_tools_search_own_registry() {
        let toolset = toolset(ScriptedSandbox::new(vec![]));

        let hits = toolset.search_tools("read");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["name"], "fs_read_file");
        assert!(toolset.search_tools("nothing-matches").is_empty());

        let details = toolset.tool_details("fs_read_file").unwrap();
        assert_eq!(details["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn call_tool_routes_skills_to_registered_caller() {
        let toolset = toolset(ScriptedSandbox::new(vec![]));

        let called: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let called_clone = Arc::clone(&called);
        toolset.set_skill_caller(Arc::new(move |name, _args| {
            let called = Arc::clone(&called_clone);
            Box::pin(async move {
                *called.lock().unwrap() = Some(name);
                Ok(json!("skill result"))
            })
        }));

        let result = toolset
            .call_tool("skills__list_skills", json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!("skill result"));
        assert_eq!(
            called.lock().unwrap().as_deref(),
            Some("skills__list_skills")
        );

        // Registry tools still resolve.
        let read = toolset
            .call_tool("fs_read_file", json!({"path": "/tmp/x"}))
            .await
            .unwrap();
        assert_eq!(read["read"], "/tmp/x");
    }

    #[tokio::test]
    async fn start_generates_bindings_module() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CodeModeConfig {
            generated_path: tmp.path().join("generated"),
            tool_proxy_url: Some("http://127.0.0.1:8765/api/v1/tool".into()),
            ..Default::default()
        };
        let mut inner = CodeModeToolset::new(
            config,
            ScriptedSandbox::new(vec![]) as Arc<dyn Sandbox>,
            true,
        );
        inner.register_tools([Arc::new(FsTool) as Arc<dyn AgentTool>]);
        let toolset = Arc::new(inner);

        toolset.start().await.unwrap();

        let bindings =
            std::fs::read_to_string(tmp.path().join("generated/tool_bindings.py")).unwrap();
        assert!(bindings.contains("http://127.0.0.1:8765/api/v1/tool"));
        assert!(bindings.contains("def call_tool"));
    }

    #[test]
    fn toolset_surface_depends_on_discovery_flag() {
        let with_discovery = toolset(ScriptedSandbox::new(vec![]));
        assert_eq!(Toolset::tools(&with_discovery).len(), 4);

        let without = Arc::new(CodeModeToolset::new(
            CodeModeConfig::default(),
            ScriptedSandbox::new(vec![]) as Arc<dyn Sandbox>,
            false,
        ));
        let tools = Toolset::tools(&without);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "execute_code");
    }
}
