//! MCP client: protocol handshake and tool interactions with one server.

use std::{collections::HashMap, sync::Arc};

use {
    anyhow::{Context, Result},
    tracing::{debug, info, warn},
};

use crate::{
    http_transport::HttpTransport,
    traits::{McpTransport, ProviderClient},
    transport::StdioTransport,
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, PROTOCOL_VERSION,
        ToolDef, ToolsCallParams, ToolsCallResult, ToolsListResult,
    },
};

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Transport established, not yet initialized.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Server process exited or was shut down.
    Closed,
}

/// An MCP client connected to a single server.
///
/// Discovered tool names are exposed with a `<server_id>_` prefix so two
/// servers with the same id (one predefined, one user-configured) can
/// coexist in one agent without tool-name collisions. `call_tool` accepts
/// either form and always sends the raw name to the server.
pub struct McpClient {
    server_id: String,
    tool_prefix: String,
    transport: Arc<dyn McpTransport>,
    state: ClientState,
    server_info: Option<InitializeResult>,
    tools: Vec<ToolDef>,
}

impl McpClient {
    /// Spawn a stdio server and perform the MCP handshake.
    pub async fn connect(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        info!(server = %server_id, command = %command, args = ?args, "connecting to MCP server");
        let transport = StdioTransport::spawn(command, args, env).await?;
        Self::from_transport(server_id, transport).await
    }

    /// Connect to a remote MCP server over HTTP.
    pub async fn connect_http(server_id: &str, url: &str) -> Result<Self> {
        info!(server = %server_id, url = %url, "connecting to MCP server via HTTP");
        let transport = HttpTransport::new(url)?;
        Self::from_transport(server_id, transport).await
    }

    /// Build a client on an already-established transport and handshake.
    pub async fn from_transport(
        server_id: &str,
        transport: Arc<dyn McpTransport>,
    ) -> Result<Self> {
        let mut client = Self {
            server_id: server_id.into(),
            tool_prefix: format!("{server_id}_"),
            transport,
            state: ClientState::Connected,
            server_info: None,
            tools: Vec::new(),
        };

        if let Err(e) = client.initialize().await {
            warn!(server = %server_id, error = %e, "MCP initialize handshake failed");
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "agentry".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await
            .context("MCP initialize request failed")?;

        let result: InitializeResult =
            serde_json::from_value(resp.result.context("MCP initialize returned no result")?)
                .context("failed to parse MCP initialize result")?;

        info!(
            server = %self.server_id,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );

        self.server_info = Some(result);

        // `initialized` notification completes the handshake.
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.state = ClientState::Ready;

        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != ClientState::Ready {
            anyhow::bail!(
                "MCP client for '{}' is not ready (state: {:?})",
                self.server_id,
                self.state
            );
        }
        Ok(())
    }

    /// The prefix applied to discovered tool names.
    pub fn tool_prefix(&self) -> &str {
        &self.tool_prefix
    }
}

#[async_trait::async_trait]
impl ProviderClient for McpClient {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn state(&self) -> ClientState {
        self.state
    }

    fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    async fn list_tools(&mut self) -> Result<&[ToolDef]> {
        self.ensure_ready()?;

        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult =
            serde_json::from_value(resp.result.context("tools/list returned no result")?)?;

        debug!(
            server = %self.server_id,
            count = result.tools.len(),
            "fetched MCP tools"
        );

        self.tools = result
            .tools
            .into_iter()
            .map(|mut tool| {
                tool.name = format!("{}{}", self.tool_prefix, tool.name);
                tool
            })
            .collect();
        Ok(&self.tools)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;

        let raw_name = name.strip_prefix(&self.tool_prefix).unwrap_or(name);
        let params = ToolsCallParams {
            name: raw_name.into(),
            arguments,
        };

        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        let result: ToolsCallResult =
            serde_json::from_value(resp.result.context("tools/call returned no result")?)?;
        Ok(result)
    }

    async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn shutdown(&mut self) {
        self.state = ClientState::Closed;
        self.transport.kill().await;
    }
}
