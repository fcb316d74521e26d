//! Loader for the user-configured MCP server file.
//!
//! The file lives at `~/.datalayer/mcp.json` and has the shape
//! `{ "mcpServers": { "<id>": { command?, args?, env?, transport?, url? } } }`.
//! Unknown fields are ignored; a missing file yields an empty server set.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info},
};

/// One entry under `mcpServers` in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFileEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Parsed user-configured server file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ConfigFileEntry>,
}

/// Default location of the user-configured server file.
pub fn default_config_path() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".datalayer")
        .join("mcp.json")
}

/// Load the config file, tolerating absence and malformed content.
///
/// A missing file is normal (no configured servers). Malformed JSON is
/// logged and treated as empty so host startup never fails on it.
pub fn load_config_file(path: &Path) -> McpConfigFile {
    if !path.exists() {
        info!(path = %path.display(), "MCP config file not found, using empty");
        return McpConfigFile::default();
    }

    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            error!(path = %path.display(), error = %e, "error reading MCP config file");
            return McpConfigFile::default();
        },
    };

    match serde_json::from_str::<McpConfigFile>(&data) {
        Ok(config) => {
            debug!(
                path = %path.display(),
                servers = config.mcp_servers.len(),
                "loaded MCP config"
            );
            config
        },
        Err(e) => {
            error!(path = %path.display(), error = %e, "invalid JSON in MCP config file");
            McpConfigFile::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let config = load_config_file(Path::new("/nonexistent/path/mcp.json"));
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn malformed_json_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = load_config_file(&path);
        assert!(config.mcp_servers.is_empty());
    }

    #[test]
    fn parses_entries_and_ignores_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(
            &path,
            r#"{
                "mcpServers": {
                    "fs": {
                        "command": "mcp-server-filesystem",
                        "args": ["/tmp"],
                        "env": {"FOO": "bar"},
                        "someFutureField": 42
                    },
                    "remote": { "transport": "http", "url": "http://localhost:9000/mcp" }
                },
                "topLevelExtra": true
            }"#,
        )
        .unwrap();

        let config = load_config_file(&path);
        assert_eq!(config.mcp_servers.len(), 2);
        assert_eq!(
            config.mcp_servers["fs"].command.as_deref(),
            Some("mcp-server-filesystem")
        );
        assert_eq!(config.mcp_servers["fs"].env["FOO"], "bar");
        assert_eq!(config.mcp_servers["remote"].transport.as_deref(), Some("http"));
        assert!(config.mcp_servers["remote"].command.is_none());
    }

    #[test]
    fn default_path_ends_with_datalayer_mcp_json() {
        let path = default_config_path();
        assert!(path.ends_with(".datalayer/mcp.json"));
    }
}
