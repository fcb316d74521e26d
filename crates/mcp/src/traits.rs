//! Trait abstractions for the transport and client layers.
//!
//! These traits let the lifecycle manager and tool bridge work against any
//! transport (stdio subprocess, HTTP) and let tests substitute scripted
//! clients without spawning processes.

use {anyhow::Result, async_trait::async_trait, serde_json::Value};

use crate::{
    client::ClientState,
    types::{JsonRpcResponse, ToolDef, ToolsCallResult},
};

/// Transport layer for MCP communication (JSON-RPC).
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// Kill/close the underlying connection/process.
    async fn kill(&self);
}

/// Client-level abstraction for one MCP server connection.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// The server id this client is connected to.
    fn server_id(&self) -> &str;

    /// Current connection state.
    fn state(&self) -> ClientState;

    /// Cached tool definitions (call `list_tools` first to populate).
    fn tools(&self) -> &[ToolDef];

    /// Fetch the list of tools from the server, caching the result.
    /// Discovered names carry the client's tool prefix.
    async fn list_tools(&mut self) -> Result<&[ToolDef]>;

    /// Call a tool on the server. Accepts either the prefixed or the raw name.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    /// Check if the server process/connection is still alive.
    async fn is_alive(&self) -> bool;

    /// Shut down the server connection.
    async fn shutdown(&mut self);
}
