//! Core record types for MCP servers and their tools.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Transport an MCP server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

/// A tool exposed by an MCP server, as discovered at handshake time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(
        default,
        rename = "inputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_schema: Option<serde_json::Value>,
}

/// An MCP server record: catalog entry, config-file entry, or a merged
/// combination of both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Server URL, set for `Transport::Http` servers.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<ServerTool>,
    /// Launch command for stdio servers (e.g. `npx`, `uvx`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the server subprocess; values may contain `${VAR}`.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Env vars that must be set and non-empty for the server to work.
    #[serde(default, rename = "requiredEnvVars")]
    pub required_env_vars: Vec<String>,
    #[serde(default, rename = "isAvailable")]
    pub is_available: bool,
    #[serde(default)]
    pub transport: Transport,
    /// True iff this record came from the user config file.
    #[serde(default, rename = "isConfig")]
    pub is_config: bool,
    #[serde(default, rename = "isRunning")]
    pub is_running: bool,
    /// UI metadata, opaque to the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

fn default_true() -> bool {
    true
}

impl McpServer {
    /// A bare record with the given id, stdio transport, no command.
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            url: String::new(),
            enabled: true,
            tools: Vec::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            required_env_vars: Vec::new(),
            is_available: false,
            transport: Transport::Stdio,
            is_config: false,
            is_running: false,
            emoji: None,
        }
    }
}
