//! JSON-RPC WebSocket client for the gateway's T1 transport.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use {
    anyhow::{Context, Result, bail},
    futures::{SinkExt, StreamExt},
    tokio::{net::TcpStream, sync::Mutex},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::debug,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Decides a `session/request_permission` frame: `Some(allow)` answers
/// the server, `None` leaves the request unanswered (the server denies
/// on its deadline).
pub type PermissionResponder =
    Box<dyn Fn(&str, &serde_json::Value) -> Option<bool> + Send + Sync>;

/// Client for the JSON-RPC-over-WebSocket agent transport.
///
/// Server-push `session/notification` frames received while waiting for a
/// response are buffered and can be drained after the call. Setting a
/// [`PermissionResponder`] opts the client into the `permissionRequests`
/// capability: permission requests arriving mid-prompt are answered (or
/// deliberately ignored) by the responder and buffered for inspection.
pub struct WsRpcClient {
    stream: Mutex<WsStream>,
    next_id: AtomicU64,
    notifications: Mutex<VecDeque<serde_json::Value>>,
    permission_responder: Option<PermissionResponder>,
}

impl WsRpcClient {
    /// Connect to an agent's WS endpoint, e.g.
    /// `ws://127.0.0.1:8765/api/v1/agents/default/ws`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            notifications: Mutex::new(VecDeque::new()),
            permission_responder: None,
        })
    }

    /// Install a permission responder; `initialize` will then declare the
    /// `permissionRequests` capability.
    pub fn with_permission_responder(
        mut self,
        responder: impl Fn(&str, &serde_json::Value) -> Option<bool> + Send + Sync + 'static,
    ) -> Self {
        self.permission_responder = Some(Box::new(responder));
        self
    }

    /// Send one JSON-RPC request and wait for its response, buffering any
    /// notifications and handling permission requests that arrive in
    /// between.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut stream = self.stream.lock().await;
        stream.send(Message::Text(frame.to_string().into())).await?;
        debug!(method = %method, id, "ws client request sent");

        loop {
            let Some(message) = stream.next().await else {
                bail!("connection closed while waiting for '{method}' response");
            };
            let text = match message? {
                Message::Text(text) => text.to_string(),
                Message::Close(_) => bail!("connection closed while waiting for '{method}'"),
                _ => continue,
            };
            let value: serde_json::Value = serde_json::from_str(&text)?;

            if value.get("id") == Some(&serde_json::json!(id)) {
                if let Some(error) = value.get("error") {
                    bail!(
                        "JSON-RPC error on '{method}': {}",
                        error["message"].as_str().unwrap_or("unknown")
                    );
                }
                return Ok(value["result"].clone());
            }

            if value["method"] == "session/request_permission" {
                self.notifications.lock().await.push_back(value.clone());
                if let Some(reply) = self.answer_permission(&value) {
                    stream.send(Message::Text(reply.to_string().into())).await?;
                }
                continue;
            }

            if value.get("method").is_some() {
                self.notifications.lock().await.push_back(value);
            }
        }
    }

    /// Build the response frame for a permission request, or `None` to
    /// leave it unanswered.
    fn answer_permission(&self, request: &serde_json::Value) -> Option<serde_json::Value> {
        let responder = self.permission_responder.as_ref()?;
        let tool_name = request["params"]["toolName"].as_str().unwrap_or_default();
        let arguments = &request["params"]["arguments"];
        let allow = responder(tool_name, arguments)?;
        debug!(tool = %tool_name, allow, "answering permission request");
        Some(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": { "allow": allow },
        }))
    }

    /// Perform the `initialize` handshake, declaring the permission
    /// capability iff a responder is installed.
    pub async fn initialize(&self) -> Result<serde_json::Value> {
        self.request(
            "initialize",
            Some(serde_json::json!({
                "capabilities": {
                    "permissionRequests": self.permission_responder.is_some(),
                },
            })),
        )
        .await
    }

    /// Open a session, returning its id.
    pub async fn new_session(&self) -> Result<String> {
        let result = self.request("session/new", None).await?;
        result["sessionId"]
            .as_str()
            .map(String::from)
            .context("session/new returned no sessionId")
    }

    /// Run one prompt in a session, returning the final text.
    pub async fn prompt(&self, session_id: &str, prompt: &str) -> Result<String> {
        let result = self
            .request(
                "session/prompt",
                Some(serde_json::json!({
                    "sessionId": session_id,
                    "prompt": prompt,
                })),
            )
            .await?;
        result["text"]
            .as_str()
            .map(String::from)
            .context("session/prompt returned no text")
    }

    /// Drain buffered server-push notifications.
    pub async fn drain_notifications(&self) -> Vec<serde_json::Value> {
        self.notifications.lock().await.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        agentry_agents::{
            AgentSpec, CompletionResponse, ModelBinding, ToolCall, Usage,
            model::{BindingFactory, EchoBindingFactory},
        },
        agentry_context::UsageTracker,
        agentry_gateway::{AppState, HostPaths, build_router},
        agentry_mcp::LifecycleManager,
        agentry_sandbox::SandboxManager,
        async_trait::async_trait,
        std::sync::{Arc, atomic::AtomicUsize},
    };

    /// Binding that calls `list_skills` once, then answers with text.
    struct ToolOnceBinding {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelBinding for ToolOnceBinding {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model_id(&self) -> &str {
            "scripted:tool-once"
        }
        fn supports_tools(&self) -> bool {
            true
        }
        async fn complete(
            &self,
            _messages: &[serde_json::Value],
            _tools: &[serde_json::Value],
        ) -> anyhow::Result<CompletionResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(CompletionResponse {
                    text: None,
                    tool_calls: vec![ToolCall {
                        id: "call_1".into(),
                        name: "list_skills".into(),
                        arguments: serde_json::json!({}),
                    }],
                    usage: Usage {
                        input_tokens: 10,
                        output_tokens: 5,
                        ..Default::default()
                    },
                })
            } else {
                Ok(CompletionResponse {
                    text: Some("Done!".into()),
                    tool_calls: vec![],
                    usage: Usage {
                        input_tokens: 20,
                        output_tokens: 10,
                        ..Default::default()
                    },
                })
            }
        }
    }

    struct ToolOnceFactory;

    impl BindingFactory for ToolOnceFactory {
        fn bind(&self, _model: &str) -> anyhow::Result<Arc<dyn ModelBinding>> {
            Ok(Arc::new(ToolOnceBinding {
                calls: AtomicUsize::new(0),
            }))
        }
    }

    fn state_with(
        root: &std::path::Path,
        bindings: Arc<dyn BindingFactory>,
    ) -> Arc<AppState> {
        AppState::new(
            Arc::new(LifecycleManager::new().with_config_path("/nonexistent/mcp.json".into())),
            Arc::new(SandboxManager::new()),
            Arc::new(UsageTracker::new()),
            bindings,
            HostPaths {
                workspace: root.to_path_buf(),
                generated: root.join("generated"),
                skills: root.join("skills"),
            },
            "echo:dev".into(),
        )
    }

    async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    async fn spawn_gateway() -> (std::net::SocketAddr, Arc<AppState>) {
        let tmp = tempfile::tempdir().unwrap();
        let state = state_with(tmp.path(), Arc::new(EchoBindingFactory));
        agentry_gateway::registry::create_agent(&state, AgentSpec::new("default", "Default"), false)
            .await
            .unwrap();
        (serve(Arc::clone(&state)).await, state)
    }

    /// Gateway whose agent has a skills toolset and a binding that calls
    /// `list_skills` once per prompt. The tempdir guard keeps the skill
    /// on disk for the test's lifetime.
    async fn spawn_tool_gateway() -> (std::net::SocketAddr, Arc<AppState>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let skill_dir = tmp.path().join("skills/demo");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: demo\ndescription: demo skill\n---\nDemonstrate.\n",
        )
        .unwrap();

        let state = state_with(tmp.path(), Arc::new(ToolOnceFactory));
        let mut spec = AgentSpec::new("default", "Default");
        spec.skills = vec!["demo".into()];
        agentry_gateway::registry::create_agent(&state, spec, false)
            .await
            .unwrap();
        (serve(Arc::clone(&state)).await, state, tmp)
    }

    #[tokio::test]
    async fn initialize_session_prompt_roundtrip() {
        let (addr, state) = spawn_gateway().await;
        let client = WsRpcClient::connect(&format!("ws://{addr}/api/v1/agents/default/ws"))
            .await
            .unwrap();

        let init = client.initialize().await.unwrap();
        assert_eq!(init["agent"]["id"], "default");
        assert_eq!(init["capabilities"]["permissionRequests"], false);

        let session = client.new_session().await.unwrap();
        let text = client.prompt(&session, "hello").await.unwrap();
        assert_eq!(text, "echo: hello");

        // Runner events arrived as notifications.
        let notifications = client.drain_notifications().await;
        assert!(notifications
            .iter()
            .any(|n| n["method"] == "session/notification"));

        // The completion callback recorded usage on the host.
        let usage = state.tracker.snapshot("default").unwrap();
        assert_eq!(usage.turns, 1);
    }

    #[tokio::test]
    async fn answered_permission_request_allows_the_tool_call() {
        let (addr, _state, _skills) = spawn_tool_gateway().await;
        let client = WsRpcClient::connect(&format!("ws://{addr}/api/v1/agents/default/ws"))
            .await
            .unwrap()
            .with_permission_responder(|tool, _args| {
                assert_eq!(tool, "list_skills");
                Some(true)
            });

        let init = client.initialize().await.unwrap();
        assert_eq!(init["capabilities"]["permissionRequests"], true);

        let session = client.new_session().await.unwrap();
        let text = client.prompt(&session, "use your tools").await.unwrap();
        assert_eq!(text, "Done!");

        let notifications = client.drain_notifications().await;
        // The permission round trip happened...
        assert!(notifications
            .iter()
            .any(|n| n["method"] == "session/request_permission"
                && n["params"]["toolName"] == "list_skills"));
        // ...and the tool call went through.
        let tool_end = notifications
            .iter()
            .find(|n| n["params"]["event"]["type"] == "TOOL_CALL_END")
            .unwrap();
        assert_eq!(tool_end["params"]["event"]["success"], true);
    }

    #[tokio::test]
    async fn unanswered_permission_request_denies_on_timeout() {
        let (addr, state, _skills) = spawn_tool_gateway().await;
        state.set_permission_timeout(std::time::Duration::from_millis(200));

        let client = WsRpcClient::connect(&format!("ws://{addr}/api/v1/agents/default/ws"))
            .await
            .unwrap()
            // Declares the capability but never answers.
            .with_permission_responder(|_tool, _args| None);

        client.initialize().await.unwrap();
        let session = client.new_session().await.unwrap();
        let text = client.prompt(&session, "use your tools").await.unwrap();
        // The loop still completes; the model saw a denial result.
        assert_eq!(text, "Done!");

        let notifications = client.drain_notifications().await;
        assert!(notifications
            .iter()
            .any(|n| n["method"] == "session/request_permission"));
        let tool_end = notifications
            .iter()
            .find(|n| n["params"]["event"]["type"] == "TOOL_CALL_END")
            .unwrap();
        assert_eq!(tool_end["params"]["event"]["success"], false);
        assert!(tool_end["params"]["event"]["error"]
            .as_str()
            .unwrap()
            .contains("denied"));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error() {
        let (addr, _state) = spawn_gateway().await;
        let client = WsRpcClient::connect(&format!("ws://{addr}/api/v1/agents/default/ws"))
            .await
            .unwrap();
        let err = client.request("bogus/method", None).await.unwrap_err();
        assert!(err.to_string().contains("unknown method"));
    }

    #[tokio::test]
    async fn connect_to_dead_port_fails() {
        assert!(WsRpcClient::connect("ws://127.0.0.1:1/api/v1/agents/x/ws")
            .await
            .is_err());
    }
}
