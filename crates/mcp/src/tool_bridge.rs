//! Bridge MCP tools to the agent tool interface.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait};

use crate::{
    traits::ProviderClient,
    types::{ToolContent, ToolDef},
};

/// Agent-callable tool seam, matching `AgentTool` in agentry-agents.
///
/// A local copy avoids a circular dependency on the agents crate; the
/// gateway wires bridges into the `ToolRegistry` through a thin adapter.
#[async_trait]
pub trait ProviderAgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value>;
}

/// A tool implementation that delegates to an MCP server.
pub struct ServerToolBridge {
    /// Prefixed tool name: `<server_id>_<tool>`.
    name: String,
    server_id: String,
    description: String,
    input_schema: serde_json::Value,
    client: Arc<tokio::sync::RwLock<dyn ProviderClient>>,
}

impl ServerToolBridge {
    /// Create a bridge for one discovered tool (its name is already prefixed).
    pub fn new(
        server_id: &str,
        tool_def: &ToolDef,
        client: Arc<tokio::sync::RwLock<dyn ProviderClient>>,
    ) -> Self {
        Self {
            name: tool_def.name.clone(),
            server_id: server_id.to_string(),
            description: tool_def
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool: {}", tool_def.name)),
            input_schema: tool_def.input_schema.clone(),
            client,
        }
    }

    /// Create bridges for all of a client's discovered tools.
    pub fn from_client(
        server_id: &str,
        tools: &[ToolDef],
        client: Arc<tokio::sync::RwLock<dyn ProviderClient>>,
    ) -> Vec<Self> {
        tools
            .iter()
            .map(|t| Self::new(server_id, t, Arc::clone(&client)))
            .collect()
    }

    /// The server this tool belongs to.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

#[async_trait]
impl ProviderAgentTool for ServerToolBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        // Strip internal metadata keys (e.g. _run_id, _session_key) injected
        // by the runner — they are not part of the tool schema and break
        // servers with strict validation.
        let params = match params {
            serde_json::Value::Object(mut map) => {
                map.retain(|k, _| !k.starts_with('_'));
                serde_json::Value::Object(map)
            },
            other => other,
        };

        let client = self.client.read().await;
        let result = client.call_tool(&self.name, params).await?;

        if result.is_error {
            let text = result
                .content
                .iter()
                .filter_map(|c| match c {
                    ToolContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            anyhow::bail!("MCP tool error: {text}");
        }

        // Flatten text content into a single JSON value.
        let texts: Vec<&str> = result
            .content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if texts.len() == 1 {
            if let Ok(val) = serde_json::from_str(texts[0]) {
                return Ok(val);
            }
            Ok(serde_json::Value::String(texts[0].to_string()))
        } else {
            Ok(serde_json::json!({ "content": texts }))
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{client::ClientState, types::ToolsCallResult},
        tokio::sync::RwLock,
    };

    /// Mock client that records the arguments passed to `call_tool`.
    struct MockClient {
        received: Arc<tokio::sync::Mutex<Option<(String, serde_json::Value)>>>,
    }

    #[async_trait]
    impl ProviderClient for MockClient {
        fn server_id(&self) -> &str {
            "mock"
        }

        fn state(&self) -> ClientState {
            ClientState::Ready
        }

        fn tools(&self) -> &[ToolDef] {
            &[]
        }

        async fn list_tools(&mut self) -> Result<&[ToolDef]> {
            Ok(&[])
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> Result<ToolsCallResult> {
            *self.received.lock().await = Some((name.to_string(), arguments));
            Ok(ToolsCallResult {
                content: vec![ToolContent::Text { text: "ok".into() }],
                is_error: false,
            })
        }

        async fn is_alive(&self) -> bool {
            true
        }

        async fn shutdown(&mut self) {}
    }

    fn bridge_with_mock() -> (
        ServerToolBridge,
        Arc<tokio::sync::Mutex<Option<(String, serde_json::Value)>>>,
    ) {
        let received = Arc::new(tokio::sync::Mutex::new(None));
        let client = MockClient {
            received: Arc::clone(&received),
        };
        let client: Arc<RwLock<dyn ProviderClient>> = Arc::new(RwLock::new(client));
        let tool_def = ToolDef {
            name: "fs_read_file".into(),
            description: Some("Read a file".into()),
            input_schema: serde_json::json!({"type": "object"}),
        };
        (ServerToolBridge::new("fs", &tool_def, client), received)
    }

    #[tokio::test]
    async fn execute_strips_internal_metadata() {
        let (bridge, received) = bridge_with_mock();

        let params = serde_json::json!({
            "path": "/tmp/test.txt",
            "_run_id": "abc123",
            "_session_key": "s1",
            "encoding": "utf-8"
        });

        bridge.execute(params).await.unwrap();

        let (_, forwarded) = received.lock().await.take().expect("call_tool was called");
        let map = forwarded.as_object().unwrap();
        assert_eq!(map.get("path").and_then(|v| v.as_str()), Some("/tmp/test.txt"));
        assert_eq!(map.get("encoding").and_then(|v| v.as_str()), Some("utf-8"));
        assert!(!map.contains_key("_run_id"));
        assert!(!map.contains_key("_session_key"));
    }

    #[tokio::test]
    async fn execute_forwards_prefixed_name() {
        let (bridge, received) = bridge_with_mock();
        bridge.execute(serde_json::json!({})).await.unwrap();
        let (name, _) = received.lock().await.take().unwrap();
        assert_eq!(name, "fs_read_file");
    }

    #[tokio::test]
    async fn single_json_text_is_parsed() {
        struct JsonClient;
        #[async_trait]
        impl ProviderClient for JsonClient {
            fn server_id(&self) -> &str {
                "j"
            }
            fn state(&self) -> ClientState {
                ClientState::Ready
            }
            fn tools(&self) -> &[ToolDef] {
                &[]
            }
            async fn list_tools(&mut self) -> Result<&[ToolDef]> {
                Ok(&[])
            }
            async fn call_tool(
                &self,
                _name: &str,
                _arguments: serde_json::Value,
            ) -> Result<ToolsCallResult> {
                Ok(ToolsCallResult {
                    content: vec![ToolContent::Text {
                        text: r#"{"files": ["a", "b"]}"#.into(),
                    }],
                    is_error: false,
                })
            }
            async fn is_alive(&self) -> bool {
                true
            }
            async fn shutdown(&mut self) {}
        }

        let client: Arc<RwLock<dyn ProviderClient>> = Arc::new(RwLock::new(JsonClient));
        let tool_def = ToolDef {
            name: "j_ls".into(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        };
        let bridge = ServerToolBridge::new("j", &tool_def, client);
        let result = bridge.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(result["files"][0], "a");
    }
}
