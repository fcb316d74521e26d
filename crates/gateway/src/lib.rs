//! The agentry gateway: materializes agents as multi-protocol endpoints
//! and exposes the management API.
//!
//! - `state`: shared runtime state (lifecycle manager, sandbox manager,
//!   usage tracker, agent registry)
//! - `factory`: agent assembly (skills + code execution + MCP servers)
//! - `registry`: process-wide agent registry
//! - `routes`: management API, tool-call proxy, health
//! - `transports`: the four per-agent wire protocols
//! - `server`: router assembly and serving

pub mod error;
pub mod factory;
pub mod registry;
pub mod routes;
pub mod server;
pub mod state;
pub mod transports;

pub use {
    error::ApiError,
    server::{build_router, serve},
    state::{AppState, HostPaths},
};
