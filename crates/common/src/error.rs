//! The host's error taxonomy.
//!
//! Crate-internal errors stay `anyhow`/`thiserror` as usual; `HostError`
//! is the shape failures take once they cross a subsystem boundary and
//! must be classified — the management API maps each variant to a status
//! code, the lifecycle manager records `Startup` failures in its sticky
//! failure map, and OAuth proxying reports provider outages as
//! `Upstream`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    /// Malformed request or config content: unknown provider id, bad
    /// server entry. Client-side, not retryable.
    #[error("{0}")]
    Configuration(String),

    /// A referenced agent, server, skill, or tool does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An identifier is already taken.
    #[error("{0}")]
    Conflict(String),

    /// A request body failed validation.
    #[error("{0}")]
    Validation(String),

    /// Terminal MCP server startup failure; `reason` is the first leaf
    /// of the flattened error chain, as recorded in the failure map.
    #[error("failed to start MCP server '{server}': {reason}")]
    Startup { server: String, reason: String },

    /// An external service the host proxies to (OAuth provider, remote
    /// kernel) failed or was unreachable.
    #[error("{0}")]
    Upstream(String),

    /// Everything else.
    #[error("{0}")]
    Internal(String),
}

impl HostError {
    #[must_use]
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    #[must_use]
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::Conflict(detail.into())
    }

    #[must_use]
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    #[must_use]
    pub fn upstream(detail: impl Into<String>) -> Self {
        Self::Upstream(detail.into())
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }
}
