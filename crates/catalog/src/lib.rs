//! Predefined MCP server catalog and environment-variable specs.
//!
//! The catalog is the static table of servers the host knows how to launch
//! without any user configuration. Availability of an entry is a pure
//! function of which environment variables are set.

pub mod envvars;
pub mod servers;
pub mod types;

pub use {
    envvars::{ENVVAR_CATALOG, EnvvarSpec},
    servers::{SERVER_CATALOG, catalog_server, check_env_vars_available, list_catalog_servers},
    types::{McpServer, ServerTool, Transport},
};
