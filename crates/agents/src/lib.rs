//! Agent composition for the agentry host.
//!
//! - `model`: the model-binding seam concrete LLM providers plug into
//! - `tool_registry`: agent-callable tools and their registry
//! - `runner`: the request/response loop with per-step usage capture
//! - `spec`: agent specifications and server selections
//! - `handle`: the running-agent wrapper with dynamic retooling

pub mod handle;
pub mod model;
pub mod runner;
pub mod spec;
pub mod tool_registry;

pub use {
    handle::{AgentHandle, CodeModeBuilder},
    model::{BindingFactory, CompletionResponse, EchoBinding, ModelBinding, ToolCall, Usage},
    runner::{ApprovalFn, OnEvent, RunResult, RunnerEvent, run_agent_loop},
    spec::{AgentSpec, SelectionOrigin, ServerSelection},
    tool_registry::{AgentTool, ToolRegistry, Toolset},
};
