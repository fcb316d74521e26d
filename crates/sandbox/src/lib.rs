//! Code-execution sandboxes for the agentry host.
//!
//! One concrete sandbox exists per process, owned by [`SandboxManager`].
//! Consumers hold a [`ManagedSandbox`] proxy that resolves the manager's
//! *current* sandbox on every call, so reconfiguring the variant at
//! runtime never requires rebuilding the consumers.

pub mod local_eval;
pub mod manager;
pub mod remote;
pub mod types;

pub use {
    local_eval::LocalEvalSandbox,
    manager::{ManagedSandbox, SandboxManager},
    remote::RemoteNotebookSandbox,
    types::{ExecutionResult, Sandbox, SandboxConfig, SandboxStatus, SandboxUpdate,
        SandboxVariant, ToolCaller},
};
