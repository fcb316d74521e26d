//! Shared gateway runtime state.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    agentry_agents::{AgentHandle, BindingFactory},
    agentry_common::RwLockExt,
    agentry_context::UsageTracker,
    agentry_mcp::LifecycleManager,
    agentry_sandbox::{SandboxManager, ToolCaller},
    agentry_tools::SkillsToolset,
};

/// Filesystem layout the host works in.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub workspace: PathBuf,
    pub generated: PathBuf,
    pub skills: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            workspace: cwd.clone(),
            generated: cwd.join("generated"),
            skills: cwd.join("skills"),
        }
    }
}

/// A registered agent: the handle plus its skills toolset, kept so the
/// tool-call proxy and retooling can reach the skills route.
pub struct AgentEntry {
    pub handle: Arc<AgentHandle>,
    pub skills: Option<Arc<SkillsToolset>>,
    pub code_execution: std::sync::atomic::AtomicBool,
}

/// Process-level state shared by every route and transport.
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub sandbox: Arc<SandboxManager>,
    pub tracker: Arc<UsageTracker>,
    pub bindings: Arc<dyn BindingFactory>,
    pub paths: HostPaths,
    pub default_model: String,
    /// Registered agents keyed by id. Read-mostly; one lock guards
    /// mutation.
    pub agents: RwLock<HashMap<String, Arc<AgentEntry>>>,
    /// Route for `POST /tool/skills/...` when the sandbox runs remotely.
    pub skills_proxy_caller: RwLock<Option<ToolCaller>>,
    /// OAuth provider endpoints for the identity proxy routes.
    pub oauth: RwLock<crate::routes::identity::OAuthConfig>,
    /// How long a WS permission request waits for the client's answer
    /// before denying, in milliseconds.
    permission_timeout_ms: AtomicU64,
}

/// Default wait before an unanswered permission request denies.
const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 60_000;

impl AppState {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        sandbox: Arc<SandboxManager>,
        tracker: Arc<UsageTracker>,
        bindings: Arc<dyn BindingFactory>,
        paths: HostPaths,
        default_model: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle,
            sandbox,
            tracker,
            bindings,
            paths,
            default_model,
            agents: RwLock::new(HashMap::new()),
            skills_proxy_caller: RwLock::new(None),
            oauth: RwLock::new(crate::routes::identity::OAuthConfig::default()),
            permission_timeout_ms: AtomicU64::new(DEFAULT_PERMISSION_TIMEOUT_MS),
        })
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.permission_timeout_ms.load(Ordering::Relaxed))
    }

    /// Shorten or lengthen the permission-request deadline (tests).
    pub fn set_permission_timeout(&self, timeout: Duration) {
        self.permission_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn agent(&self, agent_id: &str) -> Option<Arc<AgentEntry>> {
        self.agents.read_unpoisoned().get(agent_id).cloned()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read_unpoisoned().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn set_skills_proxy_caller(&self, caller: ToolCaller) {
        *self.skills_proxy_caller.write_unpoisoned() = Some(caller);
    }

    pub fn skills_proxy_caller(&self) -> Option<ToolCaller> {
        self.skills_proxy_caller.read_unpoisoned().clone()
    }
}
