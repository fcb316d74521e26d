//! Agent specifications: the declarative shape agents are created from.

use {
    serde::{Deserialize, Serialize},
    agentry_mcp::Origin,
};

/// Selection of one MCP server by id and origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSelection {
    pub id: String,
    #[serde(default)]
    pub origin: SelectionOrigin,
}

/// Where a selected server is expected to be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionOrigin {
    #[default]
    Catalog,
    Config,
}

impl From<SelectionOrigin> for Origin {
    fn from(origin: SelectionOrigin) -> Self {
        match origin {
            SelectionOrigin::Catalog => Origin::Catalog,
            SelectionOrigin::Config => Origin::Config,
        }
    }
}

/// Specification for an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: Vec<ServerSelection>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(
        default,
        rename = "systemPrompt",
        skip_serializing_if = "Option::is_none"
    )]
    pub system_prompt: Option<String>,
    #[serde(
        default,
        rename = "welcomeMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// UI metadata, opaque to the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl AgentSpec {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            mcp_servers: Vec::new(),
            skills: Vec::new(),
            model: None,
            system_prompt: None,
            welcome_message: None,
            suggestions: Vec::new(),
            emoji: None,
            color: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_origin_defaults_to_catalog() {
        let parsed: ServerSelection = serde_json::from_str(r#"{"id": "fs"}"#).unwrap();
        assert_eq!(parsed.origin, SelectionOrigin::Catalog);

        let parsed: ServerSelection =
            serde_json::from_str(r#"{"id": "fs", "origin": "config"}"#).unwrap();
        assert_eq!(parsed.origin, SelectionOrigin::Config);
    }

    #[test]
    fn spec_wire_aliases() {
        let json = r#"{
            "id": "research",
            "name": "Research Agent",
            "mcpServers": [{"id": "tavily", "origin": "catalog"}],
            "skills": ["crawl"],
            "systemPrompt": "You research things.",
            "welcomeMessage": "hi"
        }"#;
        let spec: AgentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.mcp_servers.len(), 1);
        assert_eq!(spec.system_prompt.as_deref(), Some("You research things."));
        assert_eq!(spec.welcome_message.as_deref(), Some("hi"));
    }
}
