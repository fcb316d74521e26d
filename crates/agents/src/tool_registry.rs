use std::{collections::HashMap, sync::Arc};

use {anyhow::Result, async_trait::async_trait};

use agentry_mcp::{ProviderAgentTool, ServerToolBridge};

/// Agent-callable tool.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// MCP server tools satisfy the agent tool seam directly.
#[async_trait]
impl AgentTool for ServerToolBridge {
    fn name(&self) -> &str {
        ProviderAgentTool::name(self)
    }

    fn description(&self) -> &str {
        ProviderAgentTool::description(self)
    }

    fn parameters_schema(&self) -> serde_json::Value {
        ProviderAgentTool::parameters_schema(self)
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        ProviderAgentTool::execute(self, params).await
    }
}

/// A named group of tools contributed to an agent (skills toolset,
/// code-execution toolset).
pub trait Toolset: Send + Sync {
    fn id(&self) -> &str;
    fn tools(&self) -> Vec<Arc<dyn AgentTool>>;
}

/// Registry of available tools for one agent run.
///
/// Tools are stored as `Arc<dyn AgentTool>` so the registry can be cheaply
/// cloned per run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn AgentTool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schemas in the shape model bindings expect.
    pub fn list_schemas(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
