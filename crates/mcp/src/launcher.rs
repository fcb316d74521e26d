//! Launcher seam between the lifecycle manager and the transports.
//!
//! The lifecycle manager only knows how to retry, time out, and register;
//! actually establishing a connection is behind this trait so tests can
//! inject scripted clients without spawning subprocesses.

use std::{collections::HashMap, sync::Arc};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    tokio::sync::RwLock,
};

use agentry_catalog::Transport;

use crate::{
    client::McpClient,
    http_transport::HttpTransport,
    resource_stack::ResourceStack,
    traits::{McpTransport, ProviderClient},
    transport::StdioTransport,
};

/// Everything needed to establish one server connection. Env and args are
/// already expanded by the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub server_id: String,
    pub transport: Transport,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: String,
    pub handshake_timeout: std::time::Duration,
}

/// Establishes a server connection, registering acquired resources on the
/// given stack *before* the handshake so a failed or cancelled startup can
/// be unwound.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        stack: &mut ResourceStack,
    ) -> Result<Arc<RwLock<dyn ProviderClient>>>;
}

/// Production launcher: stdio subprocess or HTTP endpoint, chosen by the
/// launch spec's transport.
pub struct StdioLauncher;

#[async_trait]
impl ServerLauncher for StdioLauncher {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        stack: &mut ResourceStack,
    ) -> Result<Arc<RwLock<dyn ProviderClient>>> {
        let transport: Arc<dyn McpTransport> = match spec.transport {
            Transport::Stdio => {
                let transport =
                    StdioTransport::spawn(&spec.command, &spec.args, &spec.env).await?;
                // The subprocess exists now; make sure it dies on any
                // terminal exit, handshake included.
                let kill_handle = Arc::clone(&transport);
                stack.push(move || async move {
                    kill_handle.kill().await;
                });
                transport
            },
            Transport::Http => {
                let url = if spec.url.is_empty() {
                    anyhow::bail!("HTTP transport for '{}' requires a url", spec.server_id)
                } else {
                    spec.url.clone()
                };
                let transport = HttpTransport::new(&url)?;
                let kill_handle = Arc::clone(&transport);
                stack.push(move || async move {
                    kill_handle.kill().await;
                });
                transport
            },
        };

        let client = tokio::time::timeout(
            spec.handshake_timeout,
            McpClient::from_transport(&spec.server_id, transport),
        )
        .await
        .with_context(|| {
            format!(
                "MCP handshake for '{}' timed out after {}s",
                spec.server_id,
                spec.handshake_timeout.as_secs()
            )
        })??;

        Ok(Arc::new(RwLock::new(client)))
    }
}
