//! Thin clients for the agentry gateway's agent-facing protocols, used by
//! downstream tooling and tests.

pub mod sse_client;
pub mod ws_client;

pub use {
    sse_client::{SseClient, parse_sse_frames},
    ws_client::{PermissionResponder, WsRpcClient},
};
