//! T2: HTTP + SSE, UI-oriented (AG-UI event vocabulary).

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
        response::sse::{KeepAlive, Sse},
    },
    serde::Deserialize,
    tracing::info,
};

use agentry_agents::RunnerEvent;

use crate::{
    error::ApiError,
    registry,
    state::AppState,
    transports::{RunParams, StreamItem, agent_frame_stream, parse_identities,
        split_prompt_and_history, sse_from_frames},
};

#[derive(Debug, Default, Deserialize)]
pub struct AguiRequest {
    #[serde(default, alias = "thread_id", rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(default, alias = "run_id", rename = "runId")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub tools: Vec<serde_json::Value>,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default, rename = "forwardedProps")]
    pub forwarded_props: serde_json::Value,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub identities: serde_json::Value,
}

/// Map runner events to AG-UI frames.
fn agui_frames(item: StreamItem) -> Vec<serde_json::Value> {
    match item {
        StreamItem::Runner(RunnerEvent::Text(text)) => {
            let message_id = uuid::Uuid::new_v4().to_string();
            vec![
                serde_json::json!({"type": "TEXT_MESSAGE_START", "messageId": message_id, "role": "assistant"}),
                serde_json::json!({"type": "TEXT_MESSAGE_CONTENT", "messageId": message_id, "delta": text}),
                serde_json::json!({"type": "TEXT_MESSAGE_END", "messageId": message_id}),
            ]
        },
        StreamItem::Runner(RunnerEvent::ToolCallStart { id, name, arguments }) => vec![
            serde_json::json!({"type": "TOOL_CALL_START", "toolCallId": id, "toolCallName": name}),
            serde_json::json!({"type": "TOOL_CALL_ARGS", "toolCallId": id, "delta": arguments.to_string()}),
        ],
        StreamItem::Runner(RunnerEvent::ToolCallEnd { id, .. }) => {
            vec![serde_json::json!({"type": "TOOL_CALL_END", "toolCallId": id})]
        },
        StreamItem::Runner(_) => Vec::new(),
        StreamItem::Completed { .. } => vec![serde_json::json!({"type": "DONE"})],
        StreamItem::Failed { message } => {
            vec![serde_json::json!({"type": "RUN_ERROR", "message": message})]
        },
    }
}

/// `POST /agents/{id}/agui` — run the agent, streaming AG-UI events.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<AguiRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;

    let (prompt, history) = split_prompt_and_history(&request.messages);
    let identities = parse_identities(&serde_json::json!({"identities": request.identities}));

    info!(
        agent = %agent_id,
        thread = ?request.thread_id,
        run = ?request.run_id,
        model = ?request.model,
        has_identities = identities.is_some(),
        "AG-UI request"
    );

    let params = RunParams {
        prompt,
        history,
        model: request.model,
        identities,
    };

    let frames = agent_frame_stream(state, entry, params, agui_frames);
    Ok(Sse::new(sse_from_frames(frames)).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::registry::test_support::test_state,
        agentry_agents::AgentSpec,
        futures::StreamExt,
    };

    #[tokio::test]
    async fn streams_text_and_done() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        crate::registry::create_agent(&state, AgentSpec::new("a1", "One"), false)
            .await
            .unwrap();

        let entry = crate::registry::get_agent(&state, "a1").unwrap();
        let params = RunParams {
            prompt: "hello".into(),
            history: None,
            model: None,
            identities: None,
        };
        let frames: Vec<serde_json::Value> =
            agent_frame_stream(Arc::clone(&state), entry, params, agui_frames)
                .collect()
                .await;

        let types: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["type"].as_str())
            .collect();
        assert!(types.contains(&"TEXT_MESSAGE_START"));
        assert!(types.contains(&"TEXT_MESSAGE_CONTENT"));
        assert!(types.contains(&"TEXT_MESSAGE_END"));
        assert_eq!(types.last(), Some(&"DONE"));

        // Completion recorded one step for the echo binding.
        let usage = state.tracker.snapshot("a1").unwrap();
        assert_eq!(usage.steps.len(), 1);
        assert_eq!(usage.turns, 1);
        assert!(!usage.message_history.is_empty());
    }

    #[test]
    fn tool_call_frames_carry_ids() {
        let frames = agui_frames(StreamItem::Runner(RunnerEvent::ToolCallStart {
            id: "tc1".into(),
            name: "fs_echo".into(),
            arguments: serde_json::json!({"x": 1}),
        }));
        assert_eq!(frames[0]["type"], "TOOL_CALL_START");
        assert_eq!(frames[0]["toolCallId"], "tc1");
        assert_eq!(frames[1]["type"], "TOOL_CALL_ARGS");

        let frames = agui_frames(StreamItem::Failed {
            message: "boom".into(),
        });
        assert_eq!(frames[0]["type"], "RUN_ERROR");
    }
}
