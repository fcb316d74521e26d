//! Sandbox manager and the live-swap proxy.
//!
//! The manager owns at most one concrete sandbox. `configure` may replace
//! it; `get` creates it lazily. Consumers hold a [`ManagedSandbox`] that
//! resolves the manager's current sandbox on every call, so a swap is
//! observed transparently on the next dereference.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    agentry_common::MutexExt,
    async_trait::async_trait,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    local_eval::LocalEvalSandbox,
    remote::{RemoteNotebookSandbox, python_str},
    types::{ExecutionResult, Sandbox, SandboxConfig, SandboxStatus, SandboxUpdate,
        SandboxVariant, ToolCaller},
};

type SandboxFactory =
    Box<dyn Fn(&SandboxConfig) -> anyhow::Result<Arc<dyn Sandbox>> + Send + Sync>;

/// Owns the process's single concrete sandbox.
pub struct SandboxManager {
    config: Mutex<SandboxConfig>,
    current: Mutex<Option<Arc<dyn Sandbox>>>,
    /// Serializes lazy creation so concurrent `get`s build one sandbox.
    create_lock: tokio::sync::Mutex<()>,
    factory: SandboxFactory,
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxManager {
    pub fn new() -> Self {
        Self::with_factory(Box::new(default_factory))
    }

    /// Substitute the sandbox constructor (tests).
    pub fn with_factory(factory: SandboxFactory) -> Self {
        Self {
            config: Mutex::new(SandboxConfig::default()),
            current: Mutex::new(None),
            create_lock: tokio::sync::Mutex::new(()),
            factory,
        }
    }

    fn lock_config(&self) -> std::sync::MutexGuard<'_, SandboxConfig> {
        self.config.lock_unpoisoned()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn Sandbox>>> {
        self.current.lock_unpoisoned()
    }

    /// Apply a configuration update. When the variant or the remote
    /// endpoint changes while a sandbox is running, the running sandbox is
    /// stopped (best effort) and the next `get` creates a fresh one.
    /// Re-applying the current configuration is a no-op.
    pub async fn configure(&self, update: SandboxUpdate) {
        let stopped = {
            let mut config = self.lock_config();
            let old_variant = config.variant;

            if let Some(server_url) = update.server_url.as_deref() {
                let (clean_url, url_token) = split_url_token(server_url);
                config.server_url = Some(clean_url);
                config.token = update.token.clone().or(url_token).or(config.token.take());
            } else if let Some(token) = update.token.clone() {
                config.token = Some(token);
            }

            if let Some(variant) = update.variant {
                config.variant = variant;
            }
            if let Some(tool_proxy_url) = update.tool_proxy_url.clone() {
                config.tool_proxy_url = Some(tool_proxy_url);
            }
            if let Some(env_vars) = update.env_vars.clone() {
                config.env_vars.extend(env_vars);
            }

            let endpoint_changed = config.variant == SandboxVariant::RemoteNotebook
                && update.server_url.is_some();
            let needs_swap = old_variant != config.variant || endpoint_changed;

            info!(
                variant = ?config.variant,
                endpoint = ?config.server_url,
                tool_proxy_url = ?config.tool_proxy_url,
                "sandbox configured"
            );

            if needs_swap {
                self.lock_current().take()
            } else {
                None
            }
        };

        if let Some(sandbox) = stopped {
            info!("sandbox configuration changed, stopping existing sandbox");
            sandbox.stop().await;
        }
    }

    /// Convenience for CLI/API usage: `<URL>?token=<TOKEN>` switches to
    /// the remote variant. Without an explicit tool-proxy URL the host's
    /// own proxy endpoint is assumed, for colocated deployments.
    pub async fn configure_from_url(
        &self,
        server_url: &str,
        tool_proxy_url: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) {
        self.configure(SandboxUpdate {
            variant: Some(SandboxVariant::RemoteNotebook),
            server_url: Some(server_url.to_string()),
            token: None,
            tool_proxy_url: Some(tool_proxy_url.unwrap_or_else(|| {
                "http://127.0.0.1:8765/api/v1/tool".to_string()
            })),
            env_vars,
        })
        .await;
    }

    /// Current sandbox, creating and starting one if needed. Env vars are
    /// injected after start on variants that do not share the host
    /// process environment.
    pub async fn get(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        if let Some(sandbox) = self.lock_current().clone() {
            return Ok(sandbox);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(sandbox) = self.lock_current().clone() {
            return Ok(sandbox);
        }

        let config = self.lock_config().clone();
        info!(variant = ?config.variant, "creating sandbox");
        let sandbox = (self.factory)(&config)?;
        sandbox.start().await?;
        inject_env_vars(sandbox.as_ref(), &config.env_vars).await;

        *self.lock_current() = Some(Arc::clone(&sandbox));
        Ok(sandbox)
    }

    /// The current sandbox without creating one.
    pub fn current_sandbox(&self) -> Option<Arc<dyn Sandbox>> {
        self.lock_current().clone()
    }

    pub fn has_current_sandbox(&self) -> bool {
        self.lock_current().is_some()
    }

    /// A proxy handle bound to this manager — safe to hold indefinitely.
    pub fn managed(self: &Arc<Self>) -> ManagedSandbox {
        ManagedSandbox {
            manager: Arc::clone(self),
        }
    }

    /// Stop and release the current sandbox, if any.
    pub async fn stop(&self) {
        let sandbox = self.lock_current().take();
        if let Some(sandbox) = sandbox {
            sandbox.stop().await;
            info!("stopped sandbox");
        }
    }

    /// Stop the current sandbox and create a fresh one.
    pub async fn restart(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        self.stop().await;
        self.get().await
    }

    pub fn status(&self) -> SandboxStatus {
        let config = self.lock_config();
        SandboxStatus {
            variant: config.variant,
            endpoint: config.server_url.clone(),
            running: self.has_current_sandbox(),
            tool_proxy_url: config.tool_proxy_url.clone(),
        }
    }

    pub fn tool_proxy_url(&self) -> Option<String> {
        self.lock_config().tool_proxy_url.clone()
    }

    pub fn variant(&self) -> SandboxVariant {
        self.lock_config().variant
    }
}

fn default_factory(config: &SandboxConfig) -> anyhow::Result<Arc<dyn Sandbox>> {
    match config.variant {
        SandboxVariant::LocalEval => Ok(Arc::new(LocalEvalSandbox::new())),
        SandboxVariant::RemoteNotebook => {
            let url = config
                .server_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("server URL is required for remote-notebook sandbox"))?;
            Ok(Arc::new(RemoteNotebookSandbox::new(
                url,
                config.token.as_deref(),
            )))
        },
    }
}

/// Inject env vars into a freshly started sandbox. Variants that share the
/// host process environment need nothing; remote kernels get an
/// `os.environ` snippet executed inside the kernel.
async fn inject_env_vars(sandbox: &dyn Sandbox, env_vars: &HashMap<String, String>) {
    if env_vars.is_empty() {
        return;
    }
    if !sandbox.has_capability("remote_env_injection") {
        debug!("sandbox shares the process environment; skipping env injection");
        return;
    }

    let mut lines = vec!["import os".to_string()];
    let mut names: Vec<&String> = env_vars.keys().collect();
    names.sort();
    for name in names {
        lines.push(format!(
            "os.environ[{}] = {}",
            python_str(name),
            python_str(&env_vars[name])
        ));
    }

    let result = sandbox.run_code(&lines.join("\n"), None).await;
    if result.ok {
        info!(count = env_vars.len(), "injected env vars into sandbox kernel");
    } else {
        warn!(error = ?result.error, "failed to inject env vars into sandbox kernel");
    }
}

/// Split a `token` query parameter off a kernel URL.
fn split_url_token(raw: &str) -> (String, Option<String>) {
    match Url::parse(raw) {
        Ok(url) => {
            let token = url
                .query_pairs()
                .find(|(k, _)| k == "token")
                .map(|(_, v)| v.to_string());
            let mut clean = url.clone();
            clean.set_query(None);
            let mut clean = clean.to_string();
            while clean.ends_with('/') {
                clean.pop();
            }
            (clean, token)
        },
        Err(_) => (raw.trim_end_matches('/').to_string(), None),
    }
}

// ── Live-swap proxy ─────────────────────────────────────────────────

/// Transparent proxy delegating every call to the manager's current
/// sandbox, resolved at call time.
///
/// `start` materializes the manager's sandbox; `stop` is a no-op because
/// lifecycle belongs to the manager. Capability probes answer for the
/// current concrete sandbox and never from the proxy's own type — this is
/// what lets consumers switch code paths correctly after a live swap.
pub struct ManagedSandbox {
    manager: Arc<SandboxManager>,
}

impl ManagedSandbox {
    /// Whether the manager currently holds a concrete sandbox.
    pub fn is_started(&self) -> bool {
        self.manager.has_current_sandbox()
    }

    async fn resolve(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        self.manager.get().await
    }
}

#[async_trait]
impl Sandbox for ManagedSandbox {
    fn variant(&self) -> SandboxVariant {
        match self.manager.current_sandbox() {
            Some(sandbox) => sandbox.variant(),
            None => self.manager.variant(),
        }
    }

    fn sandbox_id(&self) -> String {
        self.manager
            .current_sandbox()
            .map(|s| s.sandbox_id())
            .unwrap_or_default()
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.resolve().await.map(|_| ())
    }

    async fn stop(&self) {
        // Lifecycle is owned by the manager, not by individual consumers.
    }

    async fn run_code(&self, code: &str, timeout: Option<Duration>) -> ExecutionResult {
        match self.resolve().await {
            Ok(sandbox) => sandbox.run_code(code, timeout).await,
            Err(e) => ExecutionResult::infra_error(format!("sandbox unavailable: {e}")),
        }
    }

    async fn set_variable(&self, name: &str, value: &serde_json::Value) -> ExecutionResult {
        match self.resolve().await {
            Ok(sandbox) => sandbox.set_variable(name, value).await,
            Err(e) => ExecutionResult::infra_error(format!("sandbox unavailable: {e}")),
        }
    }

    async fn install_packages(
        &self,
        packages: &[String],
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        match self.resolve().await {
            Ok(sandbox) => sandbox.install_packages(packages, timeout).await,
            Err(e) => ExecutionResult::infra_error(format!("sandbox unavailable: {e}")),
        }
    }

    async fn register_tool_caller(&self, caller: ToolCaller) {
        if let Ok(sandbox) = self.resolve().await {
            sandbox.register_tool_caller(caller).await;
        }
    }

    fn is_executing(&self) -> bool {
        self.manager
            .current_sandbox()
            .map(|s| s.is_executing())
            .unwrap_or(false)
    }

    async fn interrupt(&self) -> bool {
        match self.manager.current_sandbox() {
            Some(sandbox) => sandbox.interrupt().await,
            None => false,
        }
    }

    fn has_capability(&self, name: &str) -> bool {
        self.manager
            .current_sandbox()
            .map(|s| s.has_capability(name))
            .unwrap_or(false)
    }
}
