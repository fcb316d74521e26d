//! Sandbox trait, configuration, and result types.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// Which sandbox implementation backs code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SandboxVariant {
    /// In-host interpreter subprocess; shares the host environment.
    #[default]
    #[serde(rename = "local-eval")]
    LocalEval,
    /// Remote notebook kernel reached over HTTP; own environment.
    #[serde(rename = "remote-notebook")]
    RemoteNotebook,
}

/// Configuration for the sandbox manager.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub variant: SandboxVariant,
    /// Kernel server URL, required for the remote variant.
    pub server_url: Option<String>,
    pub token: Option<String>,
    /// Tool-proxy URL handed to sandboxes that cannot reach provider
    /// subprocesses directly.
    pub tool_proxy_url: Option<String>,
    /// Env vars to inject into the kernel after start.
    pub env_vars: HashMap<String, String>,
}

/// Partial update applied by `SandboxManager::configure`. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct SandboxUpdate {
    pub variant: Option<SandboxVariant>,
    pub server_url: Option<String>,
    pub token: Option<String>,
    pub tool_proxy_url: Option<String>,
    pub env_vars: Option<HashMap<String, String>>,
}

/// Result of one code execution.
///
/// `infrastructure_error` distinguishes "the sandbox itself failed"
/// (unreachable kernel, dead subprocess — retryable) from "the user code
/// raised" (never retried).
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub infrastructure_error: bool,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: None,
            infrastructure_error: false,
        }
    }

    pub fn code_error(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
            error: Some(error.into()),
            infrastructure_error: false,
        }
    }

    pub fn infra_error(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
            infrastructure_error: true,
        }
    }
}

/// Host-side callback the sandbox uses to invoke tools by name.
pub type ToolCaller = Arc<
    dyn Fn(
            String,
            serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Status document surfaced on `/health/startup`.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxStatus {
    pub variant: SandboxVariant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub running: bool,
    #[serde(rename = "toolProxyUrl", skip_serializing_if = "Option::is_none")]
    pub tool_proxy_url: Option<String>,
}

/// A code-execution sandbox.
///
/// Variant-specific abilities are probed with [`Sandbox::has_capability`]
/// rather than downcasting, so callers holding a proxy always observe the
/// *current* sandbox's capability set.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn variant(&self) -> SandboxVariant;

    /// Identifier of this concrete sandbox incarnation.
    fn sandbox_id(&self) -> String;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self);

    /// Execute code, honoring the per-execution timeout when given.
    async fn run_code(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult;

    /// Bind a JSON value to a variable in the execution namespace.
    async fn set_variable(&self, name: &str, value: &serde_json::Value) -> ExecutionResult;

    async fn install_packages(&self, packages: &[String], timeout: Option<Duration>)
    -> ExecutionResult;

    /// Register the host-side tool caller used by generated bindings.
    async fn register_tool_caller(&self, caller: ToolCaller);

    fn is_executing(&self) -> bool;

    /// Interrupt currently running code; false when unsupported or idle.
    async fn interrupt(&self) -> bool;

    /// Probe for a variant-specific capability (e.g. `namespaces` on the
    /// remote kernel, `process_env` on local eval).
    fn has_capability(&self, name: &str) -> bool;
}
