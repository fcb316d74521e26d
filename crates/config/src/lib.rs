//! Configuration loading for the agentry host.
//!
//! - `${VAR}` placeholder expansion (`env_subst`)
//! - user-configured MCP server file at `~/.datalayer/mcp.json` (`loader`)

pub mod env_subst;
pub mod loader;

pub use {
    env_subst::{expand_args, expand_env, expand_env_map, expand_env_with},
    loader::{ConfigFileEntry, McpConfigFile, default_config_path, load_config_file},
};
