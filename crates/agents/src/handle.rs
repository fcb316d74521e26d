//! Running-agent wrapper: composes the model binding, the mutable MCP
//! server selection, and auxiliary toolsets, and supports retooling a
//! live agent without recreating it.

use std::{future::Future, pin::Pin, sync::{Arc, RwLock}};

use {anyhow::Result, tracing::{info, warn}};

use {agentry_common::RwLockExt, agentry_mcp::LifecycleManager};

use crate::{
    model::{BindingFactory, ModelBinding},
    runner::{ApprovalFn, OnEvent, RunResult, run_agent_loop},
    spec::{AgentSpec, ServerSelection},
    tool_registry::{ToolRegistry, Toolset},
};

/// Rebuilds the code-execution toolset for a new server selection.
/// Returning `Ok(None)` means "no toolset" (e.g. empty selection).
pub type CodeModeBuilder = Arc<
    dyn Fn(
            Vec<ServerSelection>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Arc<dyn Toolset>>>> + Send>>
        + Send
        + Sync,
>;

struct AuxState {
    toolsets: Vec<Arc<dyn Toolset>>,
    code_mode_index: Option<usize>,
}

/// A materialized agent.
///
/// The server selection and the code-execution toggle are mutable at any
/// time; every run resolves the selection against the *current* lifecycle
/// state, so a server that died between turns simply drops out of the
/// next turn's tool list.
pub struct AgentHandle {
    agent_id: String,
    spec: AgentSpec,
    binding: Arc<dyn ModelBinding>,
    binding_factory: Option<Arc<dyn BindingFactory>>,
    system_prompt: String,
    lifecycle: Arc<LifecycleManager>,
    selection: RwLock<Vec<ServerSelection>>,
    aux: RwLock<AuxState>,
    code_mode_builder: Option<CodeModeBuilder>,
}

impl AgentHandle {
    pub fn new(
        spec: AgentSpec,
        binding: Arc<dyn ModelBinding>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        let selection = spec.mcp_servers.clone();
        let system_prompt = spec
            .system_prompt
            .clone()
            .unwrap_or_else(|| "You are a helpful assistant.".to_string());
        Self {
            agent_id: spec.id.clone(),
            spec,
            binding,
            binding_factory: None,
            system_prompt,
            lifecycle,
            selection: RwLock::new(selection),
            aux: RwLock::new(AuxState {
                toolsets: Vec::new(),
                code_mode_index: None,
            }),
            code_mode_builder: None,
        }
    }

    /// Replace the system prompt (e.g. with the skills-augmented one).
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_binding_factory(mut self, factory: Arc<dyn BindingFactory>) -> Self {
        self.binding_factory = Some(factory);
        self
    }

    /// Install the auxiliary toolsets. `code_mode_index` marks which entry
    /// is the code-execution toolset, if any.
    pub fn with_aux_toolsets(
        self,
        toolsets: Vec<Arc<dyn Toolset>>,
        code_mode_index: Option<usize>,
    ) -> Self {
        {
            let mut aux = self.lock_aux_mut();
            aux.toolsets = toolsets;
            aux.code_mode_index = code_mode_index;
        }
        self
    }

    pub fn with_code_mode_builder(mut self, builder: CodeModeBuilder) -> Self {
        self.code_mode_builder = Some(builder);
        self
    }

    fn lock_selection(&self) -> std::sync::RwLockReadGuard<'_, Vec<ServerSelection>> {
        self.selection.read_unpoisoned()
    }

    fn lock_aux(&self) -> std::sync::RwLockReadGuard<'_, AuxState> {
        self.aux.read_unpoisoned()
    }

    fn lock_aux_mut(&self) -> std::sync::RwLockWriteGuard<'_, AuxState> {
        self.aux.write_unpoisoned()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn model_id(&self) -> &str {
        self.binding.model_id()
    }

    /// Current server selection.
    pub fn selection(&self) -> Vec<ServerSelection> {
        self.lock_selection().clone()
    }

    pub fn code_mode_enabled(&self) -> bool {
        self.lock_aux().code_mode_index.is_some()
    }

    /// Compute the effective toolset for a run, at this moment.
    ///
    /// With code execution enabled, MCP server tools are *not* registered
    /// directly — the code-execution toolset owns its own registry of
    /// them and exposes discovery tools instead. Otherwise every selected,
    /// currently-running server contributes its bridged tools.
    pub async fn effective_toolsets(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();

        if !self.code_mode_enabled() {
            let selection = self.selection();
            for selected in selection {
                let origin = selected.origin.into();
                match self
                    .lifecycle
                    .get_running_server(&selected.id, Some(origin))
                    .await
                {
                    Some(instance) if instance.is_running() => {
                        for bridge in instance.tool_bridges() {
                            registry.register(Arc::new(bridge));
                        }
                    },
                    _ => {
                        warn!(
                            agent = %self.agent_id,
                            server = %selected.id,
                            origin = ?origin,
                            "selected MCP server not running, skipping"
                        );
                    },
                }
            }
        }

        let aux = self.lock_aux();
        for toolset in &aux.toolsets {
            registry.register_all(toolset.tools());
        }
        registry
    }

    /// Replace the server selection. When code execution is enabled and a
    /// builder is present, the code-execution toolset is rebuilt so its
    /// registry reflects the new selection; an empty rebuild removes it.
    /// A failed rebuild keeps the previous toolset.
    pub async fn update_providers(&self, selection: Vec<ServerSelection>) -> Result<()> {
        if *self.lock_selection() == selection {
            info!(agent = %self.agent_id, "server selection unchanged");
            return Ok(());
        }

        *self.selection.write_unpoisoned() = selection.clone();
        info!(agent = %self.agent_id, servers = selection.len(), "updated MCP server selection");

        let code_mode_index = self.lock_aux().code_mode_index;
        let (Some(builder), Some(index)) = (self.code_mode_builder.as_ref(), code_mode_index)
        else {
            return Ok(());
        };

        match builder(selection).await {
            Ok(Some(toolset)) => {
                let mut aux = self.lock_aux_mut();
                if let Some(slot) = aux.toolsets.get_mut(index) {
                    *slot = toolset;
                    info!(agent = %self.agent_id, "rebuilt code-execution toolset");
                }
            },
            Ok(None) => {
                let mut aux = self.lock_aux_mut();
                if index < aux.toolsets.len() {
                    aux.toolsets.remove(index);
                }
                aux.code_mode_index = None;
                info!(agent = %self.agent_id, "empty selection, removed code-execution toolset");
            },
            Err(e) => {
                warn!(
                    agent = %self.agent_id,
                    error = %e,
                    "failed to rebuild code-execution toolset; keeping previous"
                );
            },
        }
        Ok(())
    }

    /// Enable or disable the code-execution toolset. Enabling requires a
    /// builder. Repeated calls with the current state are no-ops.
    pub async fn set_code_execution(&self, enabled: bool) -> Result<bool> {
        if enabled == self.code_mode_enabled() {
            info!(agent = %self.agent_id, enabled, "code execution already in requested state");
            return Ok(true);
        }

        if enabled {
            let Some(builder) = self.code_mode_builder.as_ref() else {
                warn!(agent = %self.agent_id, "cannot enable code execution without a builder");
                return Ok(false);
            };
            match builder(self.selection()).await {
                Ok(Some(toolset)) => {
                    let mut aux = self.lock_aux_mut();
                    aux.toolsets.push(toolset);
                    aux.code_mode_index = Some(aux.toolsets.len() - 1);
                    info!(agent = %self.agent_id, "code execution enabled");
                    Ok(true)
                },
                Ok(None) => {
                    warn!(agent = %self.agent_id, "code-execution builder produced no toolset");
                    Ok(false)
                },
                Err(e) => {
                    warn!(agent = %self.agent_id, error = %e, "failed to enable code execution");
                    Ok(false)
                },
            }
        } else {
            let mut aux = self.lock_aux_mut();
            if let Some(index) = aux.code_mode_index.take() {
                if index < aux.toolsets.len() {
                    aux.toolsets.remove(index);
                }
                info!(agent = %self.agent_id, "code execution disabled");
            }
            Ok(true)
        }
    }

    /// Run one turn. `model_override` resolves through the binding
    /// factory; without a factory the agent's own binding is used. An
    /// `approval` hook, when present, is consulted before each tool call.
    pub async fn run(
        &self,
        prompt: &str,
        history: Option<Vec<serde_json::Value>>,
        model_override: Option<&str>,
        on_event: Option<&OnEvent>,
        approval: Option<&ApprovalFn>,
    ) -> Result<RunResult> {
        let binding = match (model_override, self.binding_factory.as_ref()) {
            (Some(model), Some(factory)) => {
                info!(agent = %self.agent_id, model, "using model override");
                factory.bind(model)?
            },
            (Some(model), None) => {
                warn!(agent = %self.agent_id, model, "model override ignored: no binding factory");
                Arc::clone(&self.binding)
            },
            _ => Arc::clone(&self.binding),
        };

        let registry = self.effective_toolsets().await;
        run_agent_loop(
            binding,
            &registry,
            &self.system_prompt,
            prompt,
            history,
            on_event,
            approval,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            model::EchoBinding,
            spec::SelectionOrigin,
            tool_registry::AgentTool,
        },
        agentry_mcp::{LaunchSpec, ProviderClient, ResourceStack, ServerLauncher},
        async_trait::async_trait,
        std::sync::atomic::{AtomicUsize, Ordering},
        tokio::sync::RwLock as TokioRwLock,
    };

    // ── Stubs ────────────────────────────────────────────────────────

    struct StubClient {
        server_id: String,
        tools: Vec<agentry_mcp::types::ToolDef>,
    }

    #[async_trait]
    impl ProviderClient for StubClient {
        fn server_id(&self) -> &str {
            &self.server_id
        }
        fn state(&self) -> agentry_mcp::ClientState {
            agentry_mcp::ClientState::Ready
        }
        fn tools(&self) -> &[agentry_mcp::types::ToolDef] {
            &self.tools
        }
        async fn list_tools(&mut self) -> Result<&[agentry_mcp::types::ToolDef]> {
            Ok(&self.tools)
        }
        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> Result<agentry_mcp::types::ToolsCallResult> {
            Ok(agentry_mcp::types::ToolsCallResult {
                content: vec![],
                is_error: false,
            })
        }
        async fn is_alive(&self) -> bool {
            true
        }
        async fn shutdown(&mut self) {}
    }

    struct StubLauncher;

    #[async_trait]
    impl ServerLauncher for StubLauncher {
        async fn launch(
            &self,
            spec: &LaunchSpec,
            _stack: &mut ResourceStack,
        ) -> Result<Arc<TokioRwLock<dyn ProviderClient>>> {
            Ok(Arc::new(TokioRwLock::new(StubClient {
                server_id: spec.server_id.clone(),
                tools: vec![agentry_mcp::types::ToolDef {
                    name: format!("{}_list", spec.server_id),
                    description: Some("List".into()),
                    input_schema: serde_json::json!({"type": "object"}),
                }],
            })))
        }
    }

    struct NamedTool(String);

    #[async_trait]
    impl AgentTool for NamedTool {
        fn name(&self) -> &str {
            &self.0
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value> {
            Ok(params)
        }
    }

    struct StubToolset {
        id: String,
        tool_names: Vec<String>,
    }

    impl Toolset for StubToolset {
        fn id(&self) -> &str {
            &self.id
        }
        fn tools(&self) -> Vec<Arc<dyn AgentTool>> {
            self.tool_names
                .iter()
                .map(|n| Arc::new(NamedTool(n.clone())) as Arc<dyn AgentTool>)
                .collect()
        }
    }

    fn code_mode_toolset(generation: usize) -> Arc<dyn Toolset> {
        Arc::new(StubToolset {
            id: format!("code-mode-{generation}"),
            tool_names: vec!["execute_code".into(), "call_tool".into()],
        })
    }

    async fn lifecycle_with_fs() -> Arc<LifecycleManager> {
        let lifecycle = Arc::new(LifecycleManager::with_launcher(Arc::new(StubLauncher)));
        let mut config = agentry_catalog::McpServer::named("fs", "fs");
        config.command = Some("stub".into());
        config.is_config = true;
        lifecycle
            .start_server("fs", Some(config), None)
            .await
            .unwrap();
        lifecycle
    }

    fn selection(id: &str) -> Vec<ServerSelection> {
        vec![ServerSelection {
            id: id.into(),
            origin: SelectionOrigin::Config,
        }]
    }

    fn handle(lifecycle: Arc<LifecycleManager>) -> AgentHandle {
        let mut spec = AgentSpec::new("a1", "Agent One");
        spec.mcp_servers = selection("fs");
        AgentHandle::new(spec, Arc::new(EchoBinding::new("echo:dev")), lifecycle)
    }

    // ── Tests ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn provider_tools_appear_without_code_mode() {
        let lifecycle = lifecycle_with_fs().await;
        let agent = handle(lifecycle);

        let registry = agent.effective_toolsets().await;
        assert!(registry.get("fs_list").is_some());
    }

    #[tokio::test]
    async fn code_mode_hides_direct_provider_tools() {
        let lifecycle = lifecycle_with_fs().await;
        let agent = handle(lifecycle)
            .with_aux_toolsets(vec![code_mode_toolset(1)], Some(0));

        let registry = agent.effective_toolsets().await;
        assert!(registry.get("fs_list").is_none());
        assert!(registry.get("execute_code").is_some());
        assert!(registry.get("call_tool").is_some());
    }

    #[tokio::test]
    async fn dead_server_drops_out_of_toolset() {
        let lifecycle = lifecycle_with_fs().await;
        let agent = handle(Arc::clone(&lifecycle));

        assert!(agent.effective_toolsets().await.get("fs_list").is_some());
        lifecycle.stop_server("fs", agentry_mcp::Origin::Config).await;
        assert!(agent.effective_toolsets().await.get("fs_list").is_none());
    }

    #[tokio::test]
    async fn update_providers_rebuilds_code_mode_toolset() {
        let lifecycle = lifecycle_with_fs().await;
        let rebuilds = Arc::new(AtomicUsize::new(0));
        let rebuilds_clone = Arc::clone(&rebuilds);

        let builder: CodeModeBuilder = Arc::new(move |selection| {
            let rebuilds = Arc::clone(&rebuilds_clone);
            Box::pin(async move {
                if selection.is_empty() {
                    return Ok(None);
                }
                let generation = rebuilds.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Some(code_mode_toolset(generation)))
            })
        });

        let agent = handle(lifecycle)
            .with_aux_toolsets(vec![code_mode_toolset(0)], Some(0))
            .with_code_mode_builder(builder);

        agent.update_providers(selection("web")).await.unwrap();
        assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
        assert_eq!(agent.selection(), selection("web"));
        assert!(agent.code_mode_enabled());

        // Same selection again: no-op, no rebuild.
        agent.update_providers(selection("web")).await.unwrap();
        assert_eq!(rebuilds.load(Ordering::SeqCst), 1);

        // Empty selection removes the code-execution toolset.
        agent.update_providers(Vec::new()).await.unwrap();
        assert!(!agent.code_mode_enabled());
        assert!(agent.effective_toolsets().await.get("execute_code").is_none());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_toolset() {
        let lifecycle = lifecycle_with_fs().await;
        let builder: CodeModeBuilder =
            Arc::new(|_| Box::pin(async { anyhow::bail!("sandbox exploded") }));

        let agent = handle(lifecycle)
            .with_aux_toolsets(vec![code_mode_toolset(7)], Some(0))
            .with_code_mode_builder(builder);

        agent.update_providers(selection("web")).await.unwrap();
        // Rebuild failed; the old toolset is still in place.
        assert!(agent.code_mode_enabled());
        assert!(agent.effective_toolsets().await.get("execute_code").is_some());
    }

    #[tokio::test]
    async fn set_code_execution_toggles_and_is_idempotent() {
        let lifecycle = lifecycle_with_fs().await;
        let builder: CodeModeBuilder =
            Arc::new(|_| Box::pin(async { Ok(Some(code_mode_toolset(1))) }));
        let agent = handle(lifecycle).with_code_mode_builder(builder);

        assert!(!agent.code_mode_enabled());
        assert!(agent.set_code_execution(true).await.unwrap());
        assert!(agent.code_mode_enabled());
        // Idempotent.
        assert!(agent.set_code_execution(true).await.unwrap());

        assert!(agent.set_code_execution(false).await.unwrap());
        assert!(!agent.code_mode_enabled());
        assert!(agent.set_code_execution(false).await.unwrap());
    }

    #[tokio::test]
    async fn enabling_without_builder_fails_gracefully() {
        let lifecycle = lifecycle_with_fs().await;
        let agent = handle(lifecycle);
        assert!(!agent.set_code_execution(true).await.unwrap());
        assert!(!agent.code_mode_enabled());
    }

    #[tokio::test]
    async fn run_produces_steps_and_text() {
        let lifecycle = lifecycle_with_fs().await;
        let agent = handle(lifecycle);

        let result = agent.run("hello", None, None, None, None).await.unwrap();
        assert_eq!(result.text, "echo: hello");
        assert_eq!(result.steps.len(), 1);
    }
}
