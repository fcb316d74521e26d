//! SSE client for the gateway's streaming HTTP transports (T2/T3).

use {
    anyhow::{Context, Result, bail},
    futures::StreamExt,
    tracing::debug,
};

/// Client for the SSE agent transports.
pub struct SseClient {
    client: reqwest::Client,
    base_url: String,
}

impl SseClient {
    /// `base_url` is the gateway root, e.g. `http://127.0.0.1:8765`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// POST a chat request to `/api/v1/agents/{agent}/chat` and collect
    /// the event frames until the stream ends.
    pub async fn chat(
        &self,
        agent_id: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        self.stream_events(&format!("{}/api/v1/agents/{agent_id}/chat", self.base_url), body)
            .await
    }

    /// POST an AG-UI request to `/api/v1/agents/{agent}/agui`.
    pub async fn agui(
        &self,
        agent_id: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        self.stream_events(&format!("{}/api/v1/agents/{agent_id}/agui", self.base_url), body)
            .await
    }

    async fn stream_events(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("agent stream returned HTTP {status}: {body}");
        }

        let mut frames = Vec::new();
        let mut buffer = String::new();
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.context("error reading SSE stream")?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Events are separated by blank lines.
            while let Some(boundary) = buffer.find("\n\n") {
                let event = buffer[..boundary].to_string();
                buffer.drain(..boundary + 2);
                frames.extend(parse_sse_frames(&event));
            }
        }
        debug!(frames = frames.len(), "SSE stream complete");
        Ok(frames)
    }
}

/// Parse the `data:` lines of one SSE event block into JSON frames.
/// Comment/keep-alive lines are skipped.
pub fn parse_sse_frames(block: &str) -> Vec<serde_json::Value> {
    block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        agentry_agents::{AgentSpec, model::EchoBindingFactory},
        agentry_context::UsageTracker,
        agentry_gateway::{AppState, HostPaths, build_router},
        agentry_mcp::LifecycleManager,
        agentry_sandbox::SandboxManager,
        std::sync::Arc,
    };

    #[test]
    fn parses_data_lines_and_skips_comments() {
        let block = ": keep-alive\ndata: {\"type\": \"DONE\"}";
        let frames = parse_sse_frames(block);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "DONE");

        assert!(parse_sse_frames(": ping").is_empty());
        assert!(parse_sse_frames("data: not json").is_empty());
    }

    async fn spawn_gateway() -> std::net::SocketAddr {
        let tmp = tempfile::tempdir().unwrap();
        let state = AppState::new(
            Arc::new(LifecycleManager::new().with_config_path("/nonexistent/mcp.json".into())),
            Arc::new(SandboxManager::new()),
            Arc::new(UsageTracker::new()),
            Arc::new(EchoBindingFactory),
            HostPaths {
                workspace: tmp.path().to_path_buf(),
                generated: tmp.path().join("generated"),
                skills: tmp.path().join("skills"),
            },
            "echo:dev".into(),
        );
        agentry_gateway::registry::create_agent(&state, AgentSpec::new("default", "Default"), false)
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    #[tokio::test]
    async fn chat_stream_roundtrip() {
        let addr = spawn_gateway().await;
        let client = SseClient::new(&format!("http://{addr}"));

        let frames = client
            .chat(
                "default",
                &serde_json::json!({
                    "messages": [{"role": "user", "content": "hello"}]
                }),
            )
            .await
            .unwrap();

        let done = frames.iter().find(|f| f["type"] == "DONE").unwrap();
        assert_eq!(done["text"], "echo: hello");
    }

    #[tokio::test]
    async fn unknown_agent_surfaces_http_error() {
        let addr = spawn_gateway().await;
        let client = SseClient::new(&format!("http://{addr}"));
        let err = client
            .chat("ghost", &serde_json::json!({"messages": []}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
