//! Request-scoped context and usage accounting for the agentry host.
//!
//! - `identities`: per-request OAuth identity slot and env-var mapping
//! - `usage`: per-agent token/call accounting, step history, aggregates
//! - `tokens`: tokenizer seam and the model context-window table

pub mod identities;
pub mod tokens;
pub mod usage;

pub use {
    identities::{Identity, clear_request_identities, get_identity_env, get_request_identities,
        set_request_identities, with_identity_scope},
    tokens::{EstimatingTokenizer, Tokenizer, get_model_context_window},
    usage::{AgentUsage, SessionUsage, TurnUsage, UsageStep, UsageTracker},
};
