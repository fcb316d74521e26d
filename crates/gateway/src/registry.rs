//! Process-wide agent registry: create, list, get, delete.

use std::sync::Arc;

use tracing::info;

use {agentry_agents::AgentSpec, agentry_common::RwLockExt};

use crate::{
    error::ApiError,
    factory::build_agent,
    state::{AgentEntry, AppState},
};

/// Create and register an agent. 409 on id collision, 422 on validation.
pub async fn create_agent(
    state: &Arc<AppState>,
    spec: AgentSpec,
    code_execution: bool,
) -> Result<Arc<AgentEntry>, ApiError> {
    if spec.id.is_empty() {
        return Err(ApiError::unprocessable("agent id must not be empty"));
    }
    if spec.name.is_empty() {
        return Err(ApiError::unprocessable("agent name must not be empty"));
    }
    if state.agent(&spec.id).is_some() {
        return Err(ApiError::conflict(format!(
            "agent already exists: {}",
            spec.id
        )));
    }

    let entry = build_agent(state, spec, code_execution)
        .await
        .map_err(|e| ApiError::internal(format!("failed to build agent: {e}")))?;

    let agent_id = entry.handle.agent_id().to_string();
    state
        .agents
        .write_unpoisoned()
        .insert(agent_id.clone(), Arc::clone(&entry));
    info!(agent = %agent_id, "agent registered");
    Ok(entry)
}

/// Fetch an agent or 404.
pub fn get_agent(state: &AppState, agent_id: &str) -> Result<Arc<AgentEntry>, ApiError> {
    state
        .agent(agent_id)
        .ok_or_else(|| ApiError::not_found(format!("agent not found: {agent_id}")))
}

/// Remove an agent and its usage-tracker entry.
pub fn delete_agent(state: &AppState, agent_id: &str) -> Result<(), ApiError> {
    let removed = state.agents.write_unpoisoned().remove(agent_id);
    match removed {
        Some(_) => {
            state.tracker.unregister_agent(agent_id);
            info!(agent = %agent_id, "agent deleted");
            Ok(())
        },
        None => Err(ApiError::not_found(format!("agent not found: {agent_id}"))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for gateway tests: a state with stubbed launcher,
    //! mock sandbox factory, and the echo binding factory.

    use {
        super::*,
        crate::state::HostPaths,
        agentry_agents::model::EchoBindingFactory,
        agentry_context::UsageTracker,
        agentry_mcp::{
            LaunchSpec, LifecycleManager, ProviderClient, ResourceStack, ServerLauncher,
        },
        agentry_sandbox::SandboxManager,
        async_trait::async_trait,
        std::path::PathBuf,
        tokio::sync::RwLock,
    };

    pub struct StubClient {
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
        async fn list_tools(&mut self) -> anyhow::Result<&[agentry_mcp::types::ToolDef]> {
            Ok(&self.tools)
        }
        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> anyhow::Result<agentry_mcp::types::ToolsCallResult> {
            Ok(agentry_mcp::types::ToolsCallResult {
                content: vec![agentry_mcp::types::ToolContent::Text {
                    text: serde_json::json!({"tool": name, "echo": arguments}).to_string(),
                }],
                is_error: false,
            })
        }
        async fn is_alive(&self) -> bool {
            true
        }
        async fn shutdown(&mut self) {}
    }

    pub struct StubLauncher;

    #[async_trait]
    impl ServerLauncher for StubLauncher {
        async fn launch(
            &self,
            spec: &LaunchSpec,
            _stack: &mut ResourceStack,
        ) -> anyhow::Result<Arc<RwLock<dyn ProviderClient>>> {
            Ok(Arc::new(RwLock::new(StubClient {
                server_id: spec.server_id.clone(),
                tools: vec![agentry_mcp::types::ToolDef {
                    name: format!("{}_echo", spec.server_id),
                    description: Some("Echo a payload".into()),
                    input_schema: serde_json::json!({"type": "object"}),
                }],
            })))
        }
    }

    pub fn test_state(root: &std::path::Path) -> Arc<AppState> {
        let lifecycle = Arc::new(
            LifecycleManager::with_launcher(Arc::new(StubLauncher))
                .with_config_path(PathBuf::from("/nonexistent/mcp.json")),
        );
        let sandbox = Arc::new(SandboxManager::with_factory(Box::new(|_| {
            Ok(Arc::new(mock_sandbox::MockSandbox) as Arc<dyn agentry_sandbox::Sandbox>)
        })));
        AppState::new(
            lifecycle,
            sandbox,
            Arc::new(UsageTracker::new()),
            Arc::new(EchoBindingFactory),
            HostPaths {
                workspace: root.to_path_buf(),
                generated: root.join("generated"),
                skills: root.join("skills"),
            },
            "echo:dev".into(),
        )
    }

    pub mod mock_sandbox {
        use {
            agentry_sandbox::{ExecutionResult, Sandbox, SandboxVariant, ToolCaller},
            async_trait::async_trait,
            std::time::Duration,
        };

        #[derive(Default)]
        pub struct MockSandbox;

        #[async_trait]
        impl Sandbox for MockSandbox {
            fn variant(&self) -> SandboxVariant {
                SandboxVariant::LocalEval
            }
            fn sandbox_id(&self) -> String {
                "mock".into()
            }
            async fn start(&self) -> anyhow::Result<()> {
                Ok(())
            }
            async fn stop(&self) {}
            async fn run_code(
                &self,
                _code: &str,
                _timeout: Option<Duration>,
            ) -> ExecutionResult {
                ExecutionResult::success("")
            }
            async fn set_variable(
                &self,
                _name: &str,
                _value: &serde_json::Value,
            ) -> ExecutionResult {
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
    }
}

#[cfg(test)]
mod tests {
    use {super::*, super::test_support::test_state};

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let spec = AgentSpec::new("a1", "Agent One");
        create_agent(&state, spec, false).await.unwrap();

        assert!(get_agent(&state, "a1").is_ok());
        assert_eq!(state.agent_ids(), vec!["a1"]);
        assert!(state.tracker.snapshot("a1").is_some());

        delete_agent(&state, "a1").unwrap();
        assert!(get_agent(&state, "a1").is_err());
        assert!(state.tracker.snapshot("a1").is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        create_agent(&state, AgentSpec::new("a1", "One"), false)
            .await
            .unwrap();
        let err = create_agent(&state, AgentSpec::new("a1", "Two"), false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn empty_id_is_unprocessable() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let err = create_agent(&state, AgentSpec::new("", "Anon"), false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let err = delete_agent(&state, "ghost").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
