use std::sync::Arc;

use {
    anyhow::{Result, bail},
    chrono::Utc,
    tracing::{debug, info, trace, warn},
};

use agentry_context::usage::StepRecord;

use crate::{
    model::{CompletionResponse, ModelBinding},
    tool_registry::ToolRegistry,
};

/// Maximum number of request/tool-call cycles before giving up.
const MAX_ITERATIONS: usize = 25;

/// Result of running one agent turn.
#[derive(Debug)]
pub struct RunResult {
    pub text: String,
    pub iterations: usize,
    pub tool_calls_made: usize,
    /// One record per model request/response cycle, in order.
    pub steps: Vec<StepRecord>,
    /// Full message transcript of the turn, JSON-shaped for storage.
    pub messages: Vec<serde_json::Value>,
    /// Schemas of the tools that were available to this run.
    pub tool_schemas: Vec<serde_json::Value>,
}

/// Callback for streaming events out of the runner.
pub type OnEvent = Box<dyn Fn(RunnerEvent) + Send + Sync>;

/// Async approval hook consulted before each tool call. Returning false
/// skips the call and feeds a permission-denied result to the model.
pub type ApprovalFn = Box<
    dyn Fn(&str, &serde_json::Value) -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>>
        + Send
        + Sync,
>;

/// Events emitted during an agent run, in production order.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// The model is processing.
    Thinking,
    ThinkingDone,
    /// Assistant text produced by one response message.
    Text(String),
    ToolCallStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolCallEnd {
        id: String,
        name: String,
        success: bool,
        error: Option<String>,
        result: Option<serde_json::Value>,
    },
    Iteration(usize),
}

fn emit(on_event: Option<&OnEvent>, event: RunnerEvent) {
    if let Some(cb) = on_event {
        cb(event);
    }
}

/// Run the agent loop: send messages to the model, execute tool calls,
/// repeat until the model answers without tool calls.
///
/// `history` messages are inserted between the system prompt and the
/// current user message. Each request/response cycle is captured as a
/// [`StepRecord`] for the usage tracker.
pub async fn run_agent_loop(
    binding: Arc<dyn ModelBinding>,
    tools: &ToolRegistry,
    system_prompt: &str,
    user_message: &str,
    history: Option<Vec<serde_json::Value>>,
    on_event: Option<&OnEvent>,
    approval: Option<&ApprovalFn>,
) -> Result<RunResult> {
    let native_tools = binding.supports_tools();
    let tool_schemas = tools.list_schemas();

    info!(
        binding = binding.name(),
        model = binding.model_id(),
        native_tools,
        tools_count = tool_schemas.len(),
        "starting agent loop"
    );

    let mut messages: Vec<serde_json::Value> = vec![serde_json::json!({
        "role": "system",
        "content": system_prompt,
        "timestamp": Utc::now().to_rfc3339(),
    })];
    if let Some(history) = history {
        messages.extend(history);
    }
    messages.push(serde_json::json!({
        "role": "user",
        "content": user_message,
        "timestamp": Utc::now().to_rfc3339(),
    }));

    // Only bindings with native support receive tool schemas.
    let empty_schemas: Vec<serde_json::Value> = Vec::new();
    let schemas_for_api: &[serde_json::Value] = if native_tools {
        &tool_schemas
    } else {
        &empty_schemas
    };

    let mut iterations = 0usize;
    let mut total_tool_calls = 0usize;
    let mut steps: Vec<StepRecord> = Vec::new();

    loop {
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            warn!("agent loop exceeded max iterations ({MAX_ITERATIONS})");
            bail!("agent loop exceeded max iterations");
        }

        emit(on_event, RunnerEvent::Iteration(iterations));
        emit(on_event, RunnerEvent::Thinking);

        let request_started = std::time::Instant::now();
        let response: CompletionResponse = binding.complete(&messages, schemas_for_api).await?;
        let duration_ms = request_started.elapsed().as_secs_f64() * 1000.0;

        emit(on_event, RunnerEvent::ThinkingDone);

        info!(
            iteration = iterations,
            has_text = response.text.is_some(),
            tool_calls = response.tool_calls.len(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model response received"
        );

        steps.push(StepRecord {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_read_tokens: response.usage.cache_read_tokens,
            cache_write_tokens: response.usage.cache_write_tokens,
            tool_calls: response.tool_calls.len() as u64,
            tool_names: response.tool_calls.iter().map(|tc| tc.name.clone()).collect(),
            duration_ms,
        });

        if let Some(ref text) = response.text {
            emit(on_event, RunnerEvent::Text(text.clone()));
        }

        // No tool calls: the turn is complete.
        if response.tool_calls.is_empty() {
            let text = response.text.unwrap_or_default();
            messages.push(serde_json::json!({
                "role": "assistant",
                "content": text,
                "timestamp": Utc::now().to_rfc3339(),
            }));

            info!(
                iterations,
                tool_calls = total_tool_calls,
                "agent loop complete"
            );
            return Ok(RunResult {
                text,
                iterations,
                tool_calls_made: total_tool_calls,
                steps,
                messages,
                tool_schemas,
            });
        }

        // Append the assistant message carrying the tool calls.
        let tool_calls_json: Vec<serde_json::Value> = response
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();

        let mut assistant_msg = serde_json::json!({
            "role": "assistant",
            "tool_calls": tool_calls_json,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(ref text) = response.text {
            assistant_msg["content"] = serde_json::Value::String(text.clone());
        }
        messages.push(assistant_msg);

        // Execute each tool call and feed results back.
        for tc in &response.tool_calls {
            total_tool_calls += 1;

            emit(on_event, RunnerEvent::ToolCallStart {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            });

            info!(tool = %tc.name, id = %tc.id, "executing tool");

            // A transport-supplied approval hook can veto the call; the
            // model sees the denial as an ordinary tool error.
            if let Some(approve) = approval
                && !approve(&tc.name, &tc.arguments).await
            {
                let err_str = format!("tool call '{}' denied by user", tc.name);
                warn!(tool = %tc.name, id = %tc.id, "tool call denied");
                emit(on_event, RunnerEvent::ToolCallEnd {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    success: false,
                    error: Some(err_str.clone()),
                    result: None,
                });
                messages.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tc.id,
                    "content": serde_json::json!({ "error": err_str }).to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                }));
                continue;
            }

            let result = match tools.get(&tc.name) {
                Some(tool) => match tool.execute(tc.arguments.clone()).await {
                    Ok(val) => {
                        trace!(tool = %tc.name, result = %val, "tool result");
                        emit(on_event, RunnerEvent::ToolCallEnd {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            success: true,
                            error: None,
                            result: Some(val.clone()),
                        });
                        serde_json::json!({ "result": val })
                    },
                    Err(e) => {
                        let err_str = e.to_string();
                        warn!(tool = %tc.name, id = %tc.id, error = %err_str, "tool execution failed");
                        emit(on_event, RunnerEvent::ToolCallEnd {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            success: false,
                            error: Some(err_str.clone()),
                            result: None,
                        });
                        serde_json::json!({ "error": err_str })
                    },
                },
                None => {
                    let err_str = format!("unknown tool: {}", tc.name);
                    warn!(tool = %tc.name, id = %tc.id, "unknown tool requested by model");
                    emit(on_event, RunnerEvent::ToolCallEnd {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        success: false,
                        error: Some(err_str.clone()),
                        result: None,
                    });
                    serde_json::json!({ "error": err_str })
                },
            };

            let content = result.to_string();
            debug!(tool = %tc.name, id = %tc.id, result_len = content.len(), "appending tool result");
            messages.push(serde_json::json!({
                "role": "tool",
                "tool_call_id": tc.id,
                "content": content,
                "timestamp": Utc::now().to_rfc3339(),
            }));
        }
    }
}
