//! Remote-notebook sandbox: a kernel server reached over HTTP.
//!
//! The kernel runs in another process or container and does not share the
//! host environment; env vars are injected by executing a snippet that
//! writes `os.environ` inside the kernel.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tokio::sync::Mutex,
    tracing::info,
};

use crate::types::{ExecutionResult, Sandbox, SandboxVariant, ToolCaller};

const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

/// Sandbox backed by a remote notebook kernel server.
pub struct RemoteNotebookSandbox {
    sandbox_id: String,
    server_url: String,
    token: Option<String>,
    client: reqwest::Client,
    executing: AtomicBool,
    tool_caller: Mutex<Option<ToolCaller>>,
}

impl RemoteNotebookSandbox {
    pub fn new(server_url: &str, token: Option<&str>) -> Self {
        Self {
            sandbox_id: format!("remote-notebook-{}", uuid::Uuid::new_v4()),
            server_url: server_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            client: reqwest::Client::new(),
            executing: AtomicBool::new(false),
            tool_caller: Mutex::new(None),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.server_url));
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute(&self, code: &str, timeout: Duration) -> ExecutionResult {
        self.executing.store(true, Ordering::SeqCst);
        let response = self
            .request("/api/execute")
            .timeout(timeout)
            .json(&serde_json::json!({
                "code": code,
                "timeout": timeout.as_secs(),
            }))
            .send()
            .await;
        self.executing.store(false, Ordering::SeqCst);

        let response = match response {
            Ok(r) => r,
            // The kernel itself is unreachable — infrastructure, retryable.
            Err(e) => return ExecutionResult::infra_error(format!("kernel unreachable: {e}")),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return ExecutionResult::infra_error(format!("kernel returned HTTP {status}: {body}"));
        }

        match response.json::<ExecuteResponse>().await {
            Ok(parsed) if parsed.ok => ExecutionResult::success(parsed.output),
            Ok(parsed) => ExecutionResult::code_error(
                parsed.output,
                parsed.error.unwrap_or_else(|| "execution failed".into()),
            ),
            Err(e) => ExecutionResult::infra_error(format!("invalid kernel response: {e}")),
        }
    }

}

pub(crate) fn python_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl Sandbox for RemoteNotebookSandbox {
    fn variant(&self) -> SandboxVariant {
        SandboxVariant::RemoteNotebook
    }

    fn sandbox_id(&self) -> String {
        self.sandbox_id.clone()
    }

    async fn start(&self) -> anyhow::Result<()> {
        // Connectivity probe; kernel allocation is the server's business.
        let response = self
            .request("/api/execute")
            .timeout(Duration::from_secs(10))
            .json(&serde_json::json!({"code": "pass", "timeout": 10}))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("kernel server returned HTTP {}", response.status());
        }
        info!(sandbox = %self.sandbox_id, url = %self.server_url, "remote kernel reachable");
        Ok(())
    }

    async fn stop(&self) {
        // The kernel server owns its kernels; nothing to tear down here.
    }

    async fn run_code(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        self.execute(code, timeout.unwrap_or(DEFAULT_EXEC_TIMEOUT)).await
    }

    async fn set_variable(&self, name: &str, value: &serde_json::Value) -> ExecutionResult {
        let code = format!(
            "import json\n{name} = json.loads({})",
            python_str(&value.to_string())
        );
        self.execute(&code, DEFAULT_EXEC_TIMEOUT).await
    }

    async fn install_packages(
        &self,
        packages: &[String],
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        if packages.is_empty() {
            return ExecutionResult::success("");
        }
        let list = packages
            .iter()
            .map(|p| python_str(p))
            .collect::<Vec<_>>()
            .join(", ");
        let code = format!(
            "import subprocess, sys\nsubprocess.check_call([sys.executable, '-m', 'pip', 'install', {list}])"
        );
        self.execute(&code, timeout.unwrap_or(Duration::from_secs(600))).await
    }

    async fn register_tool_caller(&self, caller: ToolCaller) {
        *self.tool_caller.lock().await = Some(caller);
    }

    fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    async fn interrupt(&self) -> bool {
        let response = self
            .request("/api/interrupt")
            .timeout(Duration::from_secs(10))
            .json(&serde_json::json!({}))
            .send()
            .await;
        matches!(response, Ok(r) if r.status().is_success())
    }

    fn has_capability(&self, name: &str) -> bool {
        matches!(name, "namespaces" | "remote_env_injection")
    }
}
