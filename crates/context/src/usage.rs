//! Per-agent usage tracking: cumulative counters, append-only step
//! history, message-token split, and turn/session aggregates.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tracing::{debug, info},
};

use agentry_common::MutexExt;

use crate::tokens::{EstimatingTokenizer, Tokenizer, get_model_context_window};

/// One model request/response cycle as reported by a completed run.
#[derive(Debug, Clone, Default)]
pub struct StepRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub tool_calls: u64,
    pub tool_names: Vec<String>,
    pub duration_ms: f64,
}

/// A recorded step: a [`StepRecord`] with its sequence number and arrival
/// timestamp. The step list is append-only within a process.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStep {
    pub step: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub tool_calls: u64,
    pub tool_names: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
}

/// Usage for one turn (prompt to final response), summed over its steps.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
    pub tool_calls: u64,
    pub tool_names: Vec<String>,
    pub duration_seconds: f64,
}

impl TurnUsage {
    /// Aggregate a turn from the steps it produced.
    pub fn from_steps(steps: &[StepRecord]) -> Self {
        let mut turn = TurnUsage::default();
        for step in steps {
            turn.input_tokens += step.input_tokens;
            turn.output_tokens += step.output_tokens;
            turn.requests += 1;
            turn.tool_calls += step.tool_calls;
            turn.tool_names.extend(step.tool_names.iter().cloned());
            turn.duration_seconds += step.duration_ms / 1000.0;
        }
        turn
    }
}

/// Cumulative usage across all turns in a session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub requests: u64,
    pub tool_calls: u64,
    pub turns: u64,
    pub duration_seconds: f64,
}

impl SessionUsage {
    pub fn add_turn(&mut self, turn: &TurnUsage) {
        self.input_tokens += turn.input_tokens;
        self.output_tokens += turn.output_tokens;
        self.requests += turn.requests;
        self.tool_calls += turn.tool_calls;
        self.turns += 1;
        self.duration_seconds += turn.duration_seconds;
    }
}

/// Usage statistics for one agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUsage {
    pub agent_id: String,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,

    pub requests: u64,
    pub tool_calls: u64,
    pub turns: u64,

    pub user_message_tokens: u64,
    pub assistant_message_tokens: u64,
    pub system_prompt_tokens: u64,
    pub tool_tokens: u64,

    pub steps: Vec<UsageStep>,
    pub session: SessionUsage,

    /// Message history from the last run, replaced wholesale because
    /// messages accumulate inside the agent.
    pub message_history: Vec<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl AgentUsage {
    fn new(agent_id: &str) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            requests: 0,
            tool_calls: 0,
            turns: 0,
            user_message_tokens: 0,
            assistant_message_tokens: 0,
            system_prompt_tokens: 0,
            tool_tokens: 0,
            steps: Vec::new(),
            session: SessionUsage::default(),
            message_history: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn message_tokens(&self) -> u64 {
        self.user_message_tokens + self.assistant_message_tokens
    }

    fn record_step(&mut self, record: StepRecord) {
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.cache_read_tokens += record.cache_read_tokens;
        self.cache_write_tokens += record.cache_write_tokens;
        self.requests += 1;
        self.tool_calls += record.tool_calls;
        self.last_updated = Utc::now();

        self.steps.push(UsageStep {
            step: self.steps.len() + 1,
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cache_read_tokens: record.cache_read_tokens,
            cache_write_tokens: record.cache_write_tokens,
            tool_calls: record.tool_calls,
            tool_names: record.tool_names,
            timestamp: self.last_updated,
            duration_ms: record.duration_ms,
        });
    }

    fn reset(&mut self) {
        let agent_id = std::mem::take(&mut self.agent_id);
        let created_at = self.created_at;
        *self = Self::new(&agent_id);
        self.created_at = created_at;
    }
}

struct TrackerInner {
    agents: HashMap<String, AgentUsage>,
    models: HashMap<String, String>,
}

/// Process-wide tracker for agent usage statistics.
///
/// One mutex guards the whole table; steps are appended under the lock and
/// readers take the lock to snapshot. Interleaved runs on the same agent
/// append in arrival order — there is no per-run ordering guarantee.
pub struct UsageTracker {
    inner: Mutex<TrackerInner>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::with_tokenizer(Arc::new(EstimatingTokenizer))
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                agents: HashMap::new(),
                models: HashMap::new(),
            }),
            tokenizer,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock_unpoisoned()
    }

    /// Register an agent; idempotent. The model is remembered for
    /// context-window lookups.
    pub fn register_agent(&self, agent_id: &str, model: Option<&str>) {
        let mut inner = self.lock();
        if !inner.agents.contains_key(agent_id) {
            inner
                .agents
                .insert(agent_id.to_string(), AgentUsage::new(agent_id));
            info!(agent = %agent_id, "registered agent for usage tracking");
        }
        if let Some(model) = model {
            inner.models.insert(agent_id.to_string(), model.to_string());
        }
    }

    pub fn unregister_agent(&self, agent_id: &str) {
        let mut inner = self.lock();
        if inner.agents.remove(agent_id).is_some() {
            info!(agent = %agent_id, "unregistered agent from usage tracking");
        }
        inner.models.remove(agent_id);
    }

    pub fn set_model(&self, agent_id: &str, model: &str) {
        self.lock()
            .models
            .insert(agent_id.to_string(), model.to_string());
    }

    /// Record one model request/response cycle.
    pub fn record_step(&self, agent_id: &str, record: StepRecord) {
        let mut inner = self.lock();
        inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id))
            .record_step(record);
    }

    /// Record a completed turn: its steps plus the turn aggregate.
    pub fn record_turn(&self, agent_id: &str, steps: Vec<StepRecord>) {
        let turn = TurnUsage::from_steps(&steps);
        let mut inner = self.lock();
        let usage = inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id));
        for step in steps {
            usage.record_step(step);
        }
        usage.turns += 1;
        usage.session.add_turn(&turn);
        usage.last_updated = Utc::now();
    }

    /// Add message tokens split by role.
    pub fn update_message_tokens(&self, agent_id: &str, user_tokens: u64, assistant_tokens: u64) {
        let mut inner = self.lock();
        let usage = inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id));
        usage.user_message_tokens += user_tokens;
        usage.assistant_message_tokens += assistant_tokens;
        usage.last_updated = Utc::now();
    }

    pub fn set_system_prompt_tokens(&self, agent_id: &str, text: &str) {
        let tokens = self.tokenizer.count_tokens(text) as u64;
        let mut inner = self.lock();
        let usage = inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id));
        usage.system_prompt_tokens = tokens;
        usage.last_updated = Utc::now();
    }

    /// Replace the stored message history for an agent.
    pub fn store_messages(&self, agent_id: &str, messages: Vec<serde_json::Value>) {
        let mut inner = self.lock();
        let usage = inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id));
        debug!(agent = %agent_id, messages = messages.len(), "stored message history");
        usage.message_history = messages;
        usage.last_updated = Utc::now();
    }

    /// Store tool definitions and account their schema tokens.
    pub fn store_tools(&self, agent_id: &str, tool_definitions: &[serde_json::Value]) {
        let tokens: usize = tool_definitions
            .iter()
            .map(|def| self.tokenizer.count_tokens_json(def))
            .sum();
        let mut inner = self.lock();
        let usage = inner
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentUsage::new(agent_id));
        usage.tool_tokens = tokens as u64;
        usage.last_updated = Utc::now();
    }

    pub fn snapshot(&self, agent_id: &str) -> Option<AgentUsage> {
        self.lock().agents.get(agent_id).cloned()
    }

    pub fn total_tokens(&self, agent_id: &str) -> u64 {
        self.lock()
            .agents
            .get(agent_id)
            .map(|u| u.total_tokens())
            .unwrap_or(0)
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.lock().agents.keys().cloned().collect()
    }

    pub fn reset_agent(&self, agent_id: &str) {
        if let Some(usage) = self.lock().agents.get_mut(agent_id) {
            usage.reset();
        }
    }

    pub fn context_window(&self, agent_id: &str) -> u32 {
        match self.lock().models.get(agent_id) {
            Some(model) => get_model_context_window(model),
            None => crate::tokens::DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Context-usage breakdown for UIs: total window, used tokens, and
    /// per-category children (messages, tools, system, cache).
    pub fn context_details(&self, agent_id: &str) -> serde_json::Value {
        let window = self.context_window(agent_id);
        let inner = self.lock();

        let Some(usage) = inner.agents.get(agent_id) else {
            return serde_json::json!({
                "name": "Context",
                "totalTokens": window,
                "usedTokens": 0,
                "children": [empty_messages_category()],
            });
        };

        let mut children = Vec::new();
        if usage.message_tokens() > 0 {
            children.push(serde_json::json!({
                "name": "Messages",
                "value": usage.message_tokens(),
                "children": [
                    {"name": "User messages", "value": usage.user_message_tokens},
                    {"name": "Assistant responses", "value": usage.assistant_message_tokens},
                ],
            }));
        }
        if usage.tool_tokens > 0 {
            children.push(serde_json::json!({
                "name": "Tools",
                "value": usage.tool_tokens,
                "children": [{"name": "Tool definitions", "value": usage.tool_tokens}],
            }));
        }
        if usage.system_prompt_tokens > 0 {
            children.push(serde_json::json!({
                "name": "System",
                "value": usage.system_prompt_tokens,
                "children": [{"name": "System prompt", "value": usage.system_prompt_tokens}],
            }));
        }
        let cache = usage.cache_read_tokens + usage.cache_write_tokens;
        if cache > 0 {
            children.push(serde_json::json!({
                "name": "Cache",
                "value": cache,
                "children": [
                    {"name": "Cache read", "value": usage.cache_read_tokens},
                    {"name": "Cache write", "value": usage.cache_write_tokens},
                ],
            }));
        }
        if children.is_empty() {
            children.push(empty_messages_category());
        }

        serde_json::json!({
            "name": "Context",
            "totalTokens": window,
            "usedTokens": usage.total_tokens(),
            "children": children,
        })
    }
}

fn empty_messages_category() -> serde_json::Value {
    serde_json::json!({
        "name": "Messages",
        "value": 0,
        "children": [
            {"name": "User messages", "value": 0},
            {"name": "Assistant responses", "value": 0},
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(input: u64, output: u64) -> StepRecord {
        StepRecord {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    #[test]
    fn counters_equal_sum_of_steps() {
        let tracker = UsageTracker::new();
        tracker.register_agent("a", None);
        for (input, output) in [(100, 20), (50, 30), (40, 10)] {
            tracker.record_step("a", step(input, output));
        }

        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.steps.len(), 3);
        assert_eq!(usage.input_tokens, 190);
        assert_eq!(usage.output_tokens, 60);
        assert_eq!(usage.requests, 3);
        assert_eq!(usage.total_tokens(), 250);
        assert_eq!(tracker.total_tokens("a"), 250);

        let step_sum: u64 = usage
            .steps
            .iter()
            .map(|s| s.input_tokens + s.output_tokens)
            .sum();
        assert_eq!(step_sum, usage.total_tokens());
    }

    #[test]
    fn steps_are_append_only_and_sequenced() {
        let tracker = UsageTracker::new();
        tracker.record_step("a", step(1, 1));
        tracker.record_step("a", step(2, 2));
        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.steps[0].step, 1);
        assert_eq!(usage.steps[1].step, 2);
    }

    #[test]
    fn turn_aggregation_sums_steps() {
        let tracker = UsageTracker::new();
        tracker.record_turn("a", vec![step(100, 20), step(50, 30), step(40, 10)]);

        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.turns, 1);
        assert_eq!(usage.session.turns, 1);
        assert_eq!(usage.session.input_tokens, 190);
        assert_eq!(usage.session.requests, 3);

        tracker.record_turn("a", vec![step(10, 5)]);
        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.session.turns, 2);
        assert_eq!(usage.session.input_tokens, 200);
    }

    #[test]
    fn reset_is_explicit_and_total() {
        let tracker = UsageTracker::new();
        tracker.record_step("a", step(10, 10));
        tracker.update_message_tokens("a", 5, 7);
        tracker.reset_agent("a");

        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.total_tokens(), 0);
        assert_eq!(usage.steps.len(), 0);
        assert_eq!(usage.message_tokens(), 0);
        assert_eq!(usage.agent_id, "a");
    }

    #[test]
    fn unregister_removes_entry() {
        let tracker = UsageTracker::new();
        tracker.register_agent("a", Some("openai:gpt-4o"));
        tracker.unregister_agent("a");
        assert!(tracker.snapshot("a").is_none());
        assert!(tracker.list_agents().is_empty());
    }

    #[test]
    fn context_window_uses_registered_model() {
        let tracker = UsageTracker::new();
        tracker.register_agent("a", Some("openai:gpt-4o"));
        assert_eq!(tracker.context_window("a"), 128_000);
        tracker.set_model("a", "anthropic:claude-sonnet-4");
        assert_eq!(tracker.context_window("a"), 200_000);
        assert_eq!(tracker.context_window("unknown-agent"), 128_000);
    }

    #[test]
    fn context_details_shape() {
        let tracker = UsageTracker::new();
        tracker.record_step("a", step(100, 50));
        tracker.update_message_tokens("a", 100, 50);
        tracker.set_system_prompt_tokens("a", &"x".repeat(400));

        let details = tracker.context_details("a");
        assert_eq!(details["name"], "Context");
        assert_eq!(details["usedTokens"], 150);
        let children = details["children"].as_array().unwrap();
        assert!(children.iter().any(|c| c["name"] == "Messages"));
        assert!(children.iter().any(|c| c["name"] == "System"));

        // Unknown agent returns the empty breakdown.
        let empty = tracker.context_details("nobody");
        assert_eq!(empty["usedTokens"], 0);
    }

    #[test]
    fn store_tools_accounts_schema_tokens() {
        let tracker = UsageTracker::new();
        tracker.store_tools(
            "a",
            &[serde_json::json!({"name": "read_file", "description": "Read a file", "parameters": {"type": "object"}})],
        );
        let usage = tracker.snapshot("a").unwrap();
        assert!(usage.tool_tokens > 0);
    }

    #[test]
    fn message_history_is_replaced_not_appended() {
        let tracker = UsageTracker::new();
        tracker.store_messages("a", vec![serde_json::json!({"role": "user"})]);
        tracker.store_messages(
            "a",
            vec![
                serde_json::json!({"role": "user"}),
                serde_json::json!({"role": "assistant"}),
            ],
        );
        let usage = tracker.snapshot("a").unwrap();
        assert_eq!(usage.message_history.len(), 2);
    }
}
