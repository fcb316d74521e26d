//! MCP (Model Context Protocol) support for the agentry host.
//!
//! This crate provides:
//! - JSON-RPC 2.0 wire types and the MCP handshake types (`types`)
//! - stdio and HTTP transports (`transport`, `http_transport`)
//! - a client handling handshake and tool interactions (`client`)
//! - a bridge adapting server tools to the agent tool interface (`tool_bridge`)
//! - the server lifecycle manager with dual-origin storage (`lifecycle`)

pub mod client;
pub mod http_transport;
pub mod launcher;
pub mod lifecycle;
pub mod resource_stack;
pub mod tool_bridge;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    client::{ClientState, McpClient},
    launcher::{LaunchSpec, ServerLauncher, StdioLauncher},
    lifecycle::{
        HANDSHAKE_TIMEOUT, LifecycleManager, MAX_ATTEMPTS, Origin, STARTUP_TIMEOUT, ServerInstance,
        StartupError, merged_server_config,
    },
    resource_stack::ResourceStack,
    tool_bridge::{ProviderAgentTool, ServerToolBridge},
    traits::{McpTransport, ProviderClient},
    types::{flatten_error_chain, is_broken_resource},
};
