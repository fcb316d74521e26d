//! Static table of predefined MCP servers.
//!
//! Credentials are configured via environment variables; an entry is
//! available iff every required variable is set and non-empty.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::types::{McpServer, Transport};

fn stdio_server(
    id: &str,
    name: &str,
    description: &str,
    command: &str,
    args: &[&str],
    env: &[(&str, &str)],
    required_env_vars: &[&str],
) -> McpServer {
    let mut server = McpServer::named(id, name);
    server.description = description.to_string();
    server.command = Some(command.to_string());
    server.args = args.iter().map(|a| a.to_string()).collect();
    server.env = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    server.required_env_vars = required_env_vars.iter().map(|v| v.to_string()).collect();
    server.transport = Transport::Stdio;
    server
}

/// Predefined servers keyed by id.
pub static SERVER_CATALOG: Lazy<HashMap<String, McpServer>> = Lazy::new(|| {
    let entries = vec![
        stdio_server(
            "filesystem",
            "Filesystem",
            "Read, write and search files under a root directory",
            "npx",
            &["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
            &[],
            &[],
        ),
        stdio_server(
            "fetch",
            "Fetch",
            "Fetch web pages and convert them to markdown",
            "uvx",
            &["mcp-server-fetch"],
            &[],
            &[],
        ),
        stdio_server(
            "memory",
            "Memory",
            "Knowledge-graph based persistent memory",
            "npx",
            &["-y", "@modelcontextprotocol/server-memory"],
            &[],
            &[],
        ),
        stdio_server(
            "github",
            "GitHub",
            "Repository, issue and pull-request operations",
            "npx",
            &["-y", "@modelcontextprotocol/server-github"],
            &[("GITHUB_PERSONAL_ACCESS_TOKEN", "${GITHUB_TOKEN}")],
            &["GITHUB_TOKEN"],
        ),
        stdio_server(
            "tavily",
            "Tavily Search",
            "Web search built for AI agents",
            "npx",
            &["-y", "tavily-mcp"],
            &[("TAVILY_API_KEY", "${TAVILY_API_KEY}")],
            &["TAVILY_API_KEY"],
        ),
        stdio_server(
            "kaggle",
            "Kaggle",
            "Search and download Kaggle datasets",
            "uvx",
            &["kaggle-mcp"],
            &[("KAGGLE_TOKEN", "${KAGGLE_TOKEN}")],
            &["KAGGLE_TOKEN"],
        ),
    ];

    entries.into_iter().map(|s| (s.id.clone(), s)).collect()
});

/// Look up a catalog server by id.
pub fn catalog_server(id: &str) -> Option<&'static McpServer> {
    SERVER_CATALOG.get(id)
}

/// All catalog servers, with `is_available` computed from the current env.
pub fn list_catalog_servers() -> Vec<McpServer> {
    let mut servers: Vec<McpServer> = SERVER_CATALOG
        .values()
        .map(|s| {
            let mut server = s.clone();
            server.is_available = check_env_vars_available(&server.required_env_vars);
            server
        })
        .collect();
    servers.sort_by(|a, b| a.id.cmp(&b.id));
    servers
}

/// True iff every listed env var is set and non-empty.
pub fn check_env_vars_available(required: &[String]) -> bool {
    required
        .iter()
        .all(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}
