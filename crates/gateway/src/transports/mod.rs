//! The four per-agent wire protocols and their shared plumbing.
//!
//! Every transport follows the same pattern: extract overrides (model,
//! identities) from the request, enter the identity scope around the
//! *stream-producing future* so identities outlive the handler, pipe
//! runner events into the wire format, and record usage on completion.
//! Dropping the response stream (client disconnect) drops the run future,
//! cancelling the model call; in-flight tool subprocesses finish on their
//! own.

pub mod a2a;
pub mod agui;
pub mod chat;
pub mod ws;

use std::{convert::Infallible, sync::Arc};

use {
    axum::response::sse::Event,
    futures::Stream,
    tokio::sync::mpsc,
    tracing::warn,
};

use {
    agentry_agents::{OnEvent, RunResult, RunnerEvent},
    agentry_context::{Identity, with_identity_scope},
};

use crate::state::{AgentEntry, AppState};

/// Inputs of one transport-initiated run.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    pub prompt: String,
    pub history: Option<Vec<serde_json::Value>>,
    pub model: Option<String>,
    pub identities: Option<Vec<Identity>>,
}

/// Items fed through a transport's frame mapper.
pub enum StreamItem {
    Runner(RunnerEvent),
    Completed { text: String },
    Failed { message: String },
}

/// Pull identities out of a request body (`identities` key).
pub fn parse_identities(body: &serde_json::Value) -> Option<Vec<Identity>> {
    let raw = body.get("identities")?;
    match serde_json::from_value::<Vec<Identity>>(raw.clone()) {
        Ok(identities) if !identities.is_empty() => Some(identities),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "ignoring malformed identities in request body");
            None
        },
    }
}

/// Split a messages array into (prompt, history): the last user message is
/// the prompt, everything before it is history.
pub fn split_prompt_and_history(
    messages: &[serde_json::Value],
) -> (String, Option<Vec<serde_json::Value>>) {
    let last_user = messages.iter().rposition(|m| m["role"] == "user");
    match last_user {
        Some(index) => {
            let prompt = message_text(&messages[index]);
            let history: Vec<serde_json::Value> = messages[..index].to_vec();
            (prompt, (!history.is_empty()).then_some(history))
        },
        None => (String::new(), None),
    }
}

/// Message content as plain text; array-of-parts contents are flattened.
pub fn message_text(message: &serde_json::Value) -> String {
    match &message["content"] {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

/// Record a completed run in the usage tracker: one step per model
/// request/response cycle, the turn aggregate, the message history, and
/// role-split message tokens.
pub fn record_run(state: &AppState, agent_id: &str, run: &RunResult) {
    let input: u64 = run.steps.iter().map(|s| s.input_tokens).sum();
    let output: u64 = run.steps.iter().map(|s| s.output_tokens).sum();

    state.tracker.record_turn(agent_id, run.steps.clone());
    state.tracker.store_messages(agent_id, run.messages.clone());
    state.tracker.update_message_tokens(agent_id, input, output);
    state.tracker.store_tools(agent_id, &run.tool_schemas);
}

pub(crate) fn json_event(frame: &serde_json::Value) -> Event {
    match Event::default().json_data(frame) {
        Ok(event) => event,
        Err(_) => Event::default().data("{}"),
    }
}

/// Adapt a frame stream to SSE.
pub(crate) fn sse_from_frames(
    frames: impl Stream<Item = serde_json::Value>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    use futures::StreamExt;
    frames.map(|frame| Ok(json_event(&frame)))
}

/// Drive one agent run as a stream of wire frames. `mapper` turns each
/// item into zero or more frames.
pub fn agent_frame_stream<M>(
    state: Arc<AppState>,
    entry: Arc<AgentEntry>,
    params: RunParams,
    mapper: M,
) -> impl Stream<Item = serde_json::Value>
where
    M: Fn(StreamItem) -> Vec<serde_json::Value> + Send + 'static,
{
    async_stream::stream! {
        let agent_id = entry.handle.agent_id().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<RunnerEvent>();

        let handle = Arc::clone(&entry.handle);
        let RunParams { prompt, history, model, identities } = params;
        let run_fut = with_identity_scope(identities, async move {
            let on_event: OnEvent = Box::new(move |event| {
                let _ = tx.send(event);
            });
            handle
                .run(&prompt, history, model.as_deref(), Some(&on_event), None)
                .await
        });
        tokio::pin!(run_fut);

        enum Next {
            Event(RunnerEvent),
            Closed,
            Done(anyhow::Result<RunResult>),
        }

        let mut rx_open = true;
        let result = loop {
            let next = if rx_open {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => Next::Event(event),
                        None => Next::Closed,
                    },
                    result = &mut run_fut => Next::Done(result),
                }
            } else {
                Next::Done(run_fut.as_mut().await)
            };

            match next {
                Next::Event(event) => {
                    for frame in mapper(StreamItem::Runner(event)) {
                        yield frame;
                    }
                },
                Next::Closed => rx_open = false,
                Next::Done(result) => break result,
            }
        };

        // Events emitted just before completion may still be queued.
        while let Ok(event) = rx.try_recv() {
            for frame in mapper(StreamItem::Runner(event)) {
                yield frame;
            }
        }

        match result {
            Ok(run) => {
                record_run(&state, &agent_id, &run);
                for frame in mapper(StreamItem::Completed { text: run.text }) {
                    yield frame;
                }
            },
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "agent run failed");
                for frame in mapper(StreamItem::Failed { message: e.to_string() }) {
                    yield frame;
                }
            },
        }
    }
}
