//! MCP server lifecycle manager.
//!
//! Owns the set of running servers, split by origin: servers enabled from
//! the predefined catalog and servers declared in the user config file are
//! tracked in separate tables, so the same id may be running once in each.
//! Startup is retried with deadlines; failures are sticky until a later
//! start succeeds; every instance owns a resource stack drained on every
//! exit path.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    serde::Serialize,
    tokio::sync::{Mutex, RwLock, watch},
    tracing::{error, info, warn},
};

use {
    agentry_catalog::{McpServer, ServerTool, Transport, catalog_server},
    agentry_config::{ConfigFileEntry, expand_args, expand_env_map, load_config_file},
};

use crate::{
    launcher::{LaunchSpec, ServerLauncher, StdioLauncher},
    resource_stack::ResourceStack,
    tool_bridge::ServerToolBridge,
    traits::ProviderClient,
    types::{ToolDef, flatten_error_chain, is_broken_resource},
};

/// Overall deadline for one startup attempt.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(300);
/// Deadline for the MCP handshake within an attempt.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(180);
/// Startup attempts before a failure is recorded.
pub const MAX_ATTEMPTS: u32 = 3;

/// Which population a server instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Predefined catalog entry, enabled on demand.
    Catalog,
    /// Declared in the user config file.
    Config,
}

impl Origin {
    fn of(config: &McpServer) -> Self {
        if config.is_config {
            Origin::Config
        } else {
            Origin::Catalog
        }
    }
}

/// Terminal startup failure for one server.
#[derive(Debug, thiserror::Error)]
#[error("failed to start MCP server '{server_id}': {reason}")]
pub struct StartupError {
    pub server_id: String,
    /// First leaf of the flattened error chain — the recorded reason.
    pub reason: String,
    /// Full flattened chain, outermost first.
    pub causes: Vec<String>,
}

impl From<StartupError> for agentry_common::HostError {
    fn from(err: StartupError) -> Self {
        agentry_common::HostError::Startup {
            server: err.server_id,
            reason: err.reason,
        }
    }
}

/// A running MCP server instance.
pub struct ServerInstance {
    pub server_id: String,
    pub origin: Origin,
    /// Config snapshot with discovered tools filled in.
    pub config: McpServer,
    pub client: Arc<RwLock<dyn ProviderClient>>,
    /// Discovered tool definitions, names carrying the `<id>_` prefix.
    pub tool_defs: Vec<ToolDef>,
    resources: Mutex<ResourceStack>,
    running: AtomicBool,
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("server_id", &self.server_id)
            .field("origin", &self.origin)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ServerInstance {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Drain the scoped-resource stack (LIFO, exactly once) and mark the
    /// instance stopped.
    pub async fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.resources.lock().await.drain().await;
    }

    /// Bridges for this instance's tools, for registration into a
    /// `ToolRegistry`.
    pub fn tool_bridges(&self) -> Vec<ServerToolBridge> {
        ServerToolBridge::from_client(&self.server_id, &self.tool_defs, Arc::clone(&self.client))
    }
}

/// Status document for one server, as surfaced by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub status: String,
    #[serde(rename = "toolsCount")]
    pub tools_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "isConfig", skip_serializing_if = "Option::is_none")]
    pub is_config: Option<bool>,
}

struct Tables {
    catalog_servers: HashMap<String, Arc<ServerInstance>>,
    config_servers: HashMap<String, Arc<ServerInstance>>,
    failed_servers: HashMap<String, String>,
}

impl Tables {
    fn storage(&self, origin: Origin) -> &HashMap<String, Arc<ServerInstance>> {
        match origin {
            Origin::Catalog => &self.catalog_servers,
            Origin::Config => &self.config_servers,
        }
    }

    fn storage_mut(&mut self, origin: Origin) -> &mut HashMap<String, Arc<ServerInstance>> {
        match origin {
            Origin::Catalog => &mut self.catalog_servers,
            Origin::Config => &mut self.config_servers,
        }
    }
}

/// Centralized manager for MCP server lifecycle.
pub struct LifecycleManager {
    launcher: Arc<dyn ServerLauncher>,
    config_path: PathBuf,
    startup_timeout: Duration,
    handshake_timeout: Duration,
    inner: Mutex<Tables>,
    init_tx: watch::Sender<bool>,
    init_started: AtomicBool,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(StdioLauncher))
    }

    pub fn with_launcher(launcher: Arc<dyn ServerLauncher>) -> Self {
        let (init_tx, _) = watch::channel(false);
        Self {
            launcher,
            config_path: agentry_config::default_config_path(),
            startup_timeout: STARTUP_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            inner: Mutex::new(Tables {
                catalog_servers: HashMap::new(),
                config_servers: HashMap::new(),
                failed_servers: HashMap::new(),
            }),
            init_tx,
            init_started: AtomicBool::new(false),
        }
    }

    /// Override the user config file location (tests, non-standard homes).
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = path;
        self
    }

    /// Override the startup deadlines (tests).
    pub fn with_timeouts(mut self, startup: Duration, handshake: Duration) -> Self {
        self.startup_timeout = startup;
        self.handshake_timeout = handshake;
        self
    }

    /// Start an MCP server.
    ///
    /// If an instance for `(id, origin)` is already running it is returned
    /// unchanged. Two concurrent starts for the same key are not coalesced:
    /// both launch, the first to register wins, and the loser's resources
    /// are released before it returns the winner's instance.
    ///
    /// `extra_env` is layered over the process environment and is visible
    /// to `${VAR}` expansion in `config.env` values and `config.args`.
    pub async fn start_server(
        &self,
        server_id: &str,
        config: Option<McpServer>,
        extra_env: Option<&HashMap<String, String>>,
    ) -> Result<Arc<ServerInstance>, StartupError> {
        let config = match config.or_else(|| merged_server_config(server_id, None, false)) {
            Some(config) => config,
            None => {
                let reason = format!("no configuration found for MCP server '{server_id}'");
                error!(server = %server_id, "{reason}");
                self.record_failure(server_id, &reason).await;
                return Err(StartupError {
                    server_id: server_id.into(),
                    reason: reason.clone(),
                    causes: vec![reason],
                });
            },
        };
        let origin = Origin::of(&config);

        // Fast path under the lock; the handshake below runs without it.
        {
            let tables = self.inner.lock().await;
            if let Some(existing) = tables.storage(origin).get(server_id)
                && existing.is_running()
            {
                info!(server = %server_id, origin = ?origin, "MCP server already running");
                return Ok(Arc::clone(existing));
            }
        }

        // Compose the subprocess environment: process env, then extra_env,
        // then config.env expanded against the combined map so config
        // values can reference extra_env entries.
        let mut env: HashMap<String, String> = std::env::vars().collect();
        if let Some(extra) = extra_env {
            env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let expanded_config_env = expand_env_map(&config.env, &env);
        env.extend(expanded_config_env);
        let args = expand_args(&config.args, &env);

        let spec = LaunchSpec {
            server_id: server_id.into(),
            transport: config.transport,
            command: config.command.clone().unwrap_or_default(),
            args,
            env,
            url: config.url.clone(),
            handshake_timeout: self.handshake_timeout,
        };

        let mut attempt = 1u32;
        loop {
            info!(
                server = %server_id,
                origin = ?origin,
                attempt,
                max_attempts = MAX_ATTEMPTS,
                "starting MCP server"
            );

            let mut stack = ResourceStack::new();
            let launched = tokio::time::timeout(
                self.startup_timeout,
                self.launcher.launch(&spec, &mut stack),
            )
            .await;

            match launched {
                Ok(Ok(client)) => {
                    return Ok(self
                        .register_started(server_id, origin, config, client, stack)
                        .await);
                },
                Ok(Err(e)) => {
                    stack.drain().await;
                    let causes = flatten_error_chain(&e);
                    for cause in &causes {
                        error!(server = %server_id, attempt, cause = %cause, "MCP server startup error");
                    }
                    if is_broken_resource(&causes) && attempt < MAX_ATTEMPTS {
                        warn!(server = %server_id, "transient transport break during startup; retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let reason = causes
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "unknown startup error".into());
                    self.record_failure(server_id, &reason).await;
                    return Err(StartupError {
                        server_id: server_id.into(),
                        reason,
                        causes,
                    });
                },
                Err(_elapsed) => {
                    stack.drain().await;
                    let reason = format!("timeout after {}s", self.startup_timeout.as_secs());
                    error!(server = %server_id, attempt, "MCP server startup timed out");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    self.record_failure(server_id, &reason).await;
                    return Err(StartupError {
                        server_id: server_id.into(),
                        reason: reason.clone(),
                        causes: vec![reason],
                    });
                },
            }
        }
    }

    async fn register_started(
        &self,
        server_id: &str,
        origin: Origin,
        mut config: McpServer,
        client: Arc<RwLock<dyn ProviderClient>>,
        stack: ResourceStack,
    ) -> Arc<ServerInstance> {
        // Tool discovery failure leaves the server running with no tools.
        let tool_defs: Vec<ToolDef> = {
            let mut c = client.write().await;
            match c.list_tools().await {
                Ok(defs) => defs.to_vec(),
                Err(e) => {
                    warn!(server = %server_id, error = %e, "failed to list tools; continuing with none");
                    Vec::new()
                },
            }
        };

        let prefix = format!("{server_id}_");
        config.tools = tool_defs
            .iter()
            .map(|def| ServerTool {
                name: def
                    .name
                    .strip_prefix(&prefix)
                    .unwrap_or(&def.name)
                    .to_string(),
                description: def.description.clone().unwrap_or_default(),
                enabled: true,
                input_schema: Some(def.input_schema.clone()),
            })
            .collect();
        config.is_running = true;
        config.is_available = true;

        info!(
            server = %server_id,
            origin = ?origin,
            tools = tool_defs.len(),
            "MCP server started"
        );

        let mut stack = stack;
        let shutdown_client = Arc::clone(&client);
        stack.push(move || async move {
            shutdown_client.write().await.shutdown().await;
        });

        let instance = Arc::new(ServerInstance {
            server_id: server_id.into(),
            origin,
            config,
            client,
            tool_defs,
            resources: Mutex::new(stack),
            running: AtomicBool::new(true),
        });

        let mut tables = self.inner.lock().await;
        if let Some(existing) = tables.storage(origin).get(server_id)
            && existing.is_running()
        {
            // A concurrent start registered first; keep theirs, release ours.
            let winner = Arc::clone(existing);
            drop(tables);
            instance.release().await;
            return winner;
        }
        tables
            .storage_mut(origin)
            .insert(server_id.to_string(), Arc::clone(&instance));
        tables.failed_servers.remove(server_id);
        instance
    }

    async fn record_failure(&self, server_id: &str, reason: &str) {
        self.inner
            .lock()
            .await
            .failed_servers
            .insert(server_id.to_string(), reason.to_string());
    }

    /// Stop a running server. Returns false when nothing was running under
    /// `(id, origin)`; release errors are logged, never surfaced.
    pub async fn stop_server(&self, server_id: &str, origin: Origin) -> bool {
        let instance = {
            let mut tables = self.inner.lock().await;
            tables.storage_mut(origin).remove(server_id)
        };
        match instance {
            Some(instance) => {
                instance.release().await;
                info!(server = %server_id, origin = ?origin, "stopped MCP server");
                true
            },
            None => {
                warn!(server = %server_id, origin = ?origin, "MCP server is not running");
                false
            },
        }
    }

    /// Get a running instance. Unscoped lookups prefer the catalog origin,
    /// so a predefined server masks a configured one of the same id only
    /// when the caller did not specify.
    pub async fn get_running_server(
        &self,
        server_id: &str,
        origin: Option<Origin>,
    ) -> Option<Arc<ServerInstance>> {
        let tables = self.inner.lock().await;
        match origin {
            Some(origin) => tables.storage(origin).get(server_id).cloned(),
            None => tables
                .catalog_servers
                .get(server_id)
                .or_else(|| tables.config_servers.get(server_id))
                .cloned(),
        }
    }

    pub async fn is_server_running(&self, server_id: &str, origin: Option<Origin>) -> bool {
        self.get_running_server(server_id, origin)
            .await
            .map(|i| i.is_running())
            .unwrap_or(false)
    }

    /// All running instances, config servers first then catalog.
    pub async fn get_all_running_servers(&self) -> Vec<Arc<ServerInstance>> {
        let tables = self.inner.lock().await;
        tables
            .config_servers
            .values()
            .chain(tables.catalog_servers.values())
            .cloned()
            .collect()
    }

    pub async fn get_origin_servers(&self, origin: Origin) -> Vec<Arc<ServerInstance>> {
        let tables = self.inner.lock().await;
        tables.storage(origin).values().cloned().collect()
    }

    pub async fn get_origin_server_ids(&self, origin: Origin) -> Vec<String> {
        let tables = self.inner.lock().await;
        tables.storage(origin).keys().cloned().collect()
    }

    /// Sticky startup failures keyed by server id.
    pub async fn failed_servers(&self) -> HashMap<String, String> {
        self.inner.lock().await.failed_servers.clone()
    }

    pub async fn server_status(&self, server_id: &str, origin: Option<Origin>) -> ServerStatus {
        if let Some(instance) = self.get_running_server(server_id, origin).await {
            return ServerStatus {
                id: server_id.into(),
                status: if instance.is_running() {
                    "running".into()
                } else {
                    "stopped".into()
                },
                tools_count: instance.tool_defs.len(),
                error: None,
                is_config: Some(instance.config.is_config),
            };
        }
        let failed = self.inner.lock().await.failed_servers.get(server_id).cloned();
        match failed {
            Some(error) => ServerStatus {
                id: server_id.into(),
                status: "failed".into(),
                tools_count: 0,
                error: Some(error),
                is_config: None,
            },
            None => ServerStatus {
                id: server_id.into(),
                status: "stopped".into(),
                tools_count: 0,
                error: None,
                is_config: None,
            },
        }
    }

    /// One-shot: load the user config file, start every entry, and signal
    /// the initialization barrier when done (success or failure). Guarded
    /// to run at most once per process life.
    pub async fn start_from_config_file(&self) {
        if self.init_started.swap(true, Ordering::SeqCst) {
            warn!("MCP lifecycle initialization already started");
            return;
        }

        let config = load_config_file(&self.config_path);
        if config.mcp_servers.is_empty() {
            info!("no MCP servers in config file");
            let _ = self.init_tx.send(true);
            return;
        }

        info!(
            servers = config.mcp_servers.len(),
            "initializing MCP servers from config"
        );

        let mut entries: Vec<(&String, &ConfigFileEntry)> = config.mcp_servers.iter().collect();
        entries.sort_by_key(|(id, _)| (*id).clone());

        let mut success = 0usize;
        for (server_id, entry) in entries {
            match merged_server_config(server_id, Some(entry), true) {
                Some(merged) => match self.start_server(server_id, Some(merged), None).await {
                    Ok(_) => success += 1,
                    Err(e) => warn!(server = %server_id, error = %e, "config MCP server failed to start"),
                },
                None => warn!(server = %server_id, "no config available for MCP server"),
            }
        }

        info!(
            started = success,
            total = config.mcp_servers.len(),
            "MCP initialization complete"
        );
        let _ = self.init_tx.send(true);
    }

    /// Stop every instance in both storages, clear the failure map, and
    /// reset the initialization barrier.
    pub async fn shutdown(&self) {
        let instances = {
            let mut tables = self.inner.lock().await;
            let mut all: Vec<Arc<ServerInstance>> = tables.config_servers.drain().map(|(_, v)| v).collect();
            all.extend(tables.catalog_servers.drain().map(|(_, v)| v));
            tables.failed_servers.clear();
            all
        };
        for instance in instances {
            instance.release().await;
        }
        self.init_started.store(false, Ordering::SeqCst);
        let _ = self.init_tx.send(false);
        info!("MCP lifecycle shutdown complete");
    }

    /// Wait for config-file initialization to complete. Level-triggered:
    /// waiters that subscribe after the barrier fired return immediately.
    /// Returns false if initialization was never started or the timeout
    /// elapsed.
    pub async fn wait_for_initialization(&self, timeout: Option<Duration>) -> bool {
        if !self.init_started.load(Ordering::SeqCst) {
            return false;
        }
        let mut rx = self.init_tx.subscribe();
        let wait = async move {
            loop {
                if *rx.borrow() {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        match timeout {
            Some(t) => tokio::time::timeout(t, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.init_tx.borrow()
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from((2 * attempt).min(5)))
}

/// Merge rule for a configured entry with id `server_id`:
///
/// 1. The entry specifies a `command` (or a `url`) — use the entry
///    verbatim; display name and description fall back to the catalog.
/// 2. Otherwise, if the id exists in the catalog — start from a deep copy
///    of the catalog record and overlay the entry's env.
/// 3. Otherwise there is no config.
///
/// `${VAR}` placeholders survive merging untouched; they are expanded once
/// at start time against the composed environment.
pub fn merged_server_config(
    server_id: &str,
    entry: Option<&ConfigFileEntry>,
    from_config_file: bool,
) -> Option<McpServer> {
    if let Some(entry) = entry
        && (entry.command.is_some() || entry.url.is_some())
    {
        let catalog = catalog_server(server_id);
        let mut server = McpServer::named(
            server_id,
            entry
                .name
                .clone()
                .or_else(|| catalog.map(|c| c.name.clone()))
                .unwrap_or_else(|| title_case_id(server_id)),
        );
        server.description = entry
            .description
            .clone()
            .or_else(|| catalog.map(|c| c.description.clone()))
            .unwrap_or_default();
        server.command = entry.command.clone();
        server.args = entry.args.clone();
        server.env = entry.env.clone();
        server.transport = match entry.transport.as_deref() {
            Some("http") => Transport::Http,
            Some(_) => Transport::Stdio,
            None if entry.command.is_none() && entry.url.is_some() => Transport::Http,
            None => Transport::Stdio,
        };
        server.url = entry.url.clone().unwrap_or_default();
        server.is_config = from_config_file;
        info!(server = %server_id, "using user-provided command for MCP server");
        return Some(server);
    }

    if let Some(catalog) = catalog_server(server_id) {
        let mut server = catalog.clone();
        server.is_config = from_config_file;
        if let Some(entry) = entry {
            for (key, value) in &entry.env {
                server.env.insert(key.clone(), value.clone());
            }
        }
        info!(server = %server_id, "using catalog config for MCP server");
        return Some(server);
    }

    warn!(server = %server_id, "no config found for MCP server");
    None
}

fn title_case_id(id: &str) -> String {
    id.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{client::ClientState, types::ToolsCallResult},
        async_trait::async_trait,
        std::sync::atomic::AtomicUsize,
    };

    // ── Scripted launcher ────────────────────────────────────────────

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        FailBroken,
        FailFatal,
        Hang,
    }

    struct ScriptedLauncher {
        behaviors: Mutex<Vec<Behavior>>,
        launches: AtomicUsize,
        released: Arc<AtomicUsize>,
        specs: std::sync::Mutex<Vec<LaunchSpec>>,
    }

    impl ScriptedLauncher {
        fn new(behaviors: Vec<Behavior>) -> Arc<Self> {
            Arc::new(Self {
                behaviors: Mutex::new(behaviors),
                launches: AtomicUsize::new(0),
                released: Arc::new(AtomicUsize::new(0)),
                specs: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn launch_count(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    struct StubClient {
        server_id: String,
        tools: Vec<ToolDef>,
    }

    #[async_trait]
    impl ProviderClient for StubClient {
        fn server_id(&self) -> &str {
            &self.server_id
        }
        fn state(&self) -> ClientState {
            ClientState::Ready
        }
        fn tools(&self) -> &[ToolDef] {
            &self.tools
        }
        async fn list_tools(&mut self) -> anyhow::Result<&[ToolDef]> {
            Ok(&self.tools)
        }
        async fn call_tool(
            &self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> anyhow::Result<ToolsCallResult> {
            Ok(ToolsCallResult {
                content: Vec::new(),
                is_error: false,
            })
        }
        async fn is_alive(&self) -> bool {
            true
        }
        async fn shutdown(&mut self) {}
    }

    #[async_trait]
    impl ServerLauncher for ScriptedLauncher {
        async fn launch(
            &self,
            spec: &LaunchSpec,
            stack: &mut ResourceStack,
        ) -> anyhow::Result<Arc<RwLock<dyn ProviderClient>>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().unwrap().push(spec.clone());

            let behavior = {
                let mut behaviors = self.behaviors.lock().await;
                if behaviors.is_empty() {
                    Behavior::Succeed
                } else {
                    behaviors.remove(0)
                }
            };

            // Simulate the subprocess existing before the handshake.
            let released = Arc::clone(&self.released);
            stack.push(move || async move {
                released.fetch_add(1, Ordering::SeqCst);
            });

            match behavior {
                Behavior::Succeed => {
                    let client = StubClient {
                        server_id: spec.server_id.clone(),
                        tools: vec![ToolDef {
                            name: format!("{}_echo", spec.server_id),
                            description: Some("Echo".into()),
                            input_schema: serde_json::json!({"type": "object"}),
                        }],
                    };
                    Ok(Arc::new(RwLock::new(client)))
                },
                Behavior::FailBroken => anyhow::bail!("transport error: broken pipe"),
                Behavior::FailFatal => anyhow::bail!("no such file or directory"),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                },
            }
        }
    }

    fn test_config(id: &str, is_config: bool) -> McpServer {
        let mut config = McpServer::named(id, id);
        config.command = Some("stub".into());
        config.is_config = is_config;
        config
    }

    fn manager(launcher: Arc<ScriptedLauncher>) -> LifecycleManager {
        LifecycleManager::with_launcher(launcher)
            .with_config_path(PathBuf::from("/nonexistent/mcp.json"))
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(3))
    }

    // ── Start/stop semantics ─────────────────────────────────────────

    #[tokio::test]
    async fn start_is_idempotent_for_running_server() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(Arc::clone(&launcher));

        let first = mgr
            .start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap();
        let second = mgr
            .start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn same_id_runs_once_per_origin() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(launcher);

        mgr.start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap();
        mgr.start_server("fs", Some(test_config("fs", true)), None)
            .await
            .unwrap();

        let catalog = mgr.get_running_server("fs", Some(Origin::Catalog)).await.unwrap();
        let config = mgr.get_running_server("fs", Some(Origin::Config)).await.unwrap();
        assert!(!Arc::ptr_eq(&catalog, &config));
        assert_eq!(mgr.get_all_running_servers().await.len(), 2);

        // Unscoped lookup prefers the catalog instance.
        let unscoped = mgr.get_running_server("fs", None).await.unwrap();
        assert!(Arc::ptr_eq(&unscoped, &catalog));
    }

    #[tokio::test]
    async fn stop_twice_returns_false_second_time() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(Arc::clone(&launcher));

        mgr.start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap();
        assert!(mgr.stop_server("fs", Origin::Catalog).await);
        assert!(!mgr.stop_server("fs", Origin::Catalog).await);
        assert_eq!(launcher.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn running_count_tracks_starts_minus_stops_per_origin() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(launcher);

        mgr.start_server("a", Some(test_config("a", false)), None).await.unwrap();
        mgr.start_server("a", Some(test_config("a", true)), None).await.unwrap();
        mgr.start_server("b", Some(test_config("b", true)), None).await.unwrap();
        assert_eq!(mgr.get_all_running_servers().await.len(), 3);

        mgr.stop_server("a", Origin::Config).await;
        assert_eq!(mgr.get_all_running_servers().await.len(), 2);
        assert!(mgr.is_server_running("a", Some(Origin::Catalog)).await);
        assert!(!mgr.is_server_running("a", Some(Origin::Config)).await);
    }

    // ── Failure policy ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn broken_resource_retries_then_succeeds() {
        let launcher = ScriptedLauncher::new(vec![Behavior::FailBroken, Behavior::Succeed]);
        let mgr = manager(Arc::clone(&launcher));

        let instance = mgr
            .start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap();
        assert!(instance.is_running());
        assert_eq!(launcher.launch_count(), 2);
        // The failed attempt's resources were released.
        assert_eq!(launcher.released.load(Ordering::SeqCst), 1);
        assert!(mgr.failed_servers().await.is_empty());
    }

    #[tokio::test]
    async fn fatal_error_does_not_retry_and_is_sticky() {
        let launcher = ScriptedLauncher::new(vec![Behavior::FailFatal]);
        let mgr = manager(Arc::clone(&launcher));

        let err = mgr
            .start_server("fs", Some(test_config("fs", false)), None)
            .await
            .unwrap_err();
        assert_eq!(launcher.launch_count(), 1);
        assert!(err.reason.contains("no such file"));

        let failed = mgr.failed_servers().await;
        assert!(failed["fs"].contains("no such file"));
        assert_eq!(mgr.server_status("fs", None).await.status, "failed");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retries_until_attempts_exhausted() {
        let launcher =
            ScriptedLauncher::new(vec![Behavior::Hang, Behavior::Hang, Behavior::Hang]);
        let mgr = manager(Arc::clone(&launcher));

        let err = mgr
            .start_server("slow", Some(test_config("slow", false)), None)
            .await
            .unwrap_err();
        assert_eq!(launcher.launch_count(), MAX_ATTEMPTS as usize);
        assert!(err.reason.contains("timeout"));
        // Every cancelled attempt released its resources.
        assert_eq!(
            launcher.released.load(Ordering::SeqCst),
            MAX_ATTEMPTS as usize
        );
    }

    #[tokio::test]
    async fn successful_start_clears_sticky_failure() {
        let launcher = ScriptedLauncher::new(vec![Behavior::FailFatal, Behavior::Succeed]);
        let mgr = manager(launcher);

        let config = test_config("fs", false);
        assert!(mgr.start_server("fs", Some(config.clone()), None).await.is_err());
        assert!(mgr.failed_servers().await.contains_key("fs"));

        mgr.start_server("fs", Some(config), None).await.unwrap();
        assert!(!mgr.failed_servers().await.contains_key("fs"));
    }

    // ── Env composition ──────────────────────────────────────────────

    #[tokio::test]
    async fn extra_env_is_visible_to_config_env_and_args() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(Arc::clone(&launcher));

        let mut config = test_config("github", false);
        config.env = HashMap::from([("X".to_string(), "${A}".to_string())]);
        config.args = vec!["--k".to_string(), "${B}".to_string()];
        let extra = HashMap::from([("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]);

        mgr.start_server("github", Some(config), Some(&extra))
            .await
            .unwrap();

        let specs = launcher.specs.lock().unwrap();
        let spec = specs.last().unwrap();
        assert_eq!(spec.env["X"], "1");
        assert!(spec.args.contains(&"2".to_string()));
        // extra_env itself is part of the subprocess environment.
        assert_eq!(spec.env["A"], "1");
    }

    // ── Shutdown & barrier ───────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_drains_everything() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(Arc::clone(&launcher));

        mgr.start_server("a", Some(test_config("a", false)), None).await.unwrap();
        mgr.start_server("b", Some(test_config("b", true)), None).await.unwrap();
        mgr.start_server("bad", None, None).await.unwrap_err();

        mgr.shutdown().await;

        assert!(mgr.get_running_server("a", None).await.is_none());
        assert!(mgr.get_running_server("b", None).await.is_none());
        assert!(mgr.failed_servers().await.is_empty());
        assert!(!mgr.is_initialized());
        // Both instances' release closures ran (success path shutdown).
        assert_eq!(launcher.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn barrier_is_level_triggered_for_late_waiters() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = Arc::new(manager(launcher));

        // Not started yet: waiting reports false immediately.
        assert!(!mgr.wait_for_initialization(Some(Duration::from_millis(10))).await);
        assert!(!mgr.is_initialized());

        mgr.start_from_config_file().await;
        assert!(mgr.is_initialized());

        // A waiter arriving after the barrier fired observes it.
        assert!(mgr.wait_for_initialization(None).await);
        assert!(mgr.wait_for_initialization(Some(Duration::from_millis(10))).await);
    }

    #[tokio::test]
    async fn config_file_initialization_starts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{"mcpServers": {"fs": {"command": "stub"}, "web": {"command": "stub2"}}}"#,
        )
        .unwrap();

        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = LifecycleManager::with_launcher(Arc::clone(&launcher) as Arc<dyn ServerLauncher>)
            .with_config_path(path)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(3));

        mgr.start_from_config_file().await;
        assert!(mgr.is_initialized());
        assert_eq!(mgr.get_origin_servers(Origin::Config).await.len(), 2);
        // Entries from the file are config-origin.
        assert!(mgr.is_server_running("fs", Some(Origin::Config)).await);
        assert!(!mgr.is_server_running("fs", Some(Origin::Catalog)).await);
    }

    #[tokio::test]
    async fn config_file_initialization_runs_once() {
        let launcher = ScriptedLauncher::new(vec![]);
        let mgr = manager(launcher);
        mgr.start_from_config_file().await;
        mgr.start_from_config_file().await; // guarded no-op
        assert!(mgr.is_initialized());
    }

    // ── Merge rule ───────────────────────────────────────────────────

    #[test]
    fn merge_user_command_wins() {
        let entry = ConfigFileEntry {
            command: Some("my-fs".into()),
            args: vec!["--root".into(), "/data".into()],
            ..Default::default()
        };
        let merged = merged_server_config("filesystem", Some(&entry), true).unwrap();
        assert_eq!(merged.command.as_deref(), Some("my-fs"));
        assert!(merged.is_config);
        // Display name falls back to the catalog record.
        assert_eq!(merged.name, "Filesystem");
    }

    #[test]
    fn merge_env_overlays_catalog() {
        let entry = ConfigFileEntry {
            env: HashMap::from([("GITHUB_PERSONAL_ACCESS_TOKEN".to_string(), "${GH}".to_string())]),
            ..Default::default()
        };
        let merged = merged_server_config("github", Some(&entry), true).unwrap();
        assert_eq!(merged.command.as_deref(), Some("npx"));
        assert_eq!(merged.env["GITHUB_PERSONAL_ACCESS_TOKEN"], "${GH}");
        assert!(merged.is_config);
    }

    #[test]
    fn merge_unknown_id_without_command_is_none() {
        let entry = ConfigFileEntry::default();
        assert!(merged_server_config("mystery", Some(&entry), true).is_none());
    }

    #[test]
    fn merge_url_only_entry_is_http() {
        let entry = ConfigFileEntry {
            url: Some("http://localhost:9000/mcp".into()),
            ..Default::default()
        };
        let merged = merged_server_config("remote-tools", Some(&entry), true).unwrap();
        assert_eq!(merged.transport, Transport::Http);
        assert_eq!(merged.url, "http://localhost:9000/mcp");
        assert_eq!(merged.name, "Remote Tools");
    }
}
