//! T3: HTTP + SSE, chat-oriented. Same event vocabulary as T2 with
//! tool-call annotations and a usage summary on completion.

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
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "builtinTools")]
    pub builtin_tools: Vec<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub identities: serde_json::Value,
}

/// Chat frames: tool-call events carry success/result annotations, and
/// the final DONE carries the response text. The WS transport reuses
/// these frames as notification payloads.
pub(crate) fn chat_frames(item: StreamItem) -> Vec<serde_json::Value> {
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
            serde_json::json!({
                "type": "TOOL_CALL_START",
                "toolCallId": id,
                "toolCallName": name,
                "arguments": arguments,
            }),
        ],
        StreamItem::Runner(RunnerEvent::ToolCallEnd {
            id,
            name,
            success,
            error,
            result,
        }) => vec![serde_json::json!({
            "type": "TOOL_CALL_END",
            "toolCallId": id,
            "toolCallName": name,
            "success": success,
            "error": error,
            "result": result,
        })],
        StreamItem::Runner(_) => Vec::new(),
        StreamItem::Completed { text } => {
            vec![serde_json::json!({"type": "DONE", "text": text})]
        },
        StreamItem::Failed { message } => {
            vec![serde_json::json!({"type": "RUN_ERROR", "message": message})]
        },
    }
}

/// `POST /agents/{id}/chat` — run the agent, streaming chat events.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;

    let (prompt, history) = split_prompt_and_history(&request.messages);
    let identities = parse_identities(&serde_json::json!({"identities": request.identities}));

    if !request.builtin_tools.is_empty() {
        // Built-in model capabilities are the binding's concern; the host
        // only records the selection.
        info!(agent = %agent_id, builtin_tools = ?request.builtin_tools, "builtin tools requested");
    }

    let params = RunParams {
        prompt,
        history,
        model: request.model,
        identities,
    };

    let frames = agent_frame_stream(state, entry, params, chat_frames);
    Ok(Sse::new(sse_from_frames(frames)).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::registry::test_support::test_state,
        agentry_agents::{AgentSpec, SelectionOrigin, ServerSelection},
        futures::StreamExt,
    };

    #[tokio::test]
    async fn chat_stream_over_tool_using_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        // Start a server so the agent has tools; the echo binding never
        // calls them, but the toolset resolution path is exercised.
        let mut config = agentry_catalog::McpServer::named("fs", "fs");
        config.command = Some("stub".into());
        state
            .lifecycle
            .start_server("fs", Some(config), None)
            .await
            .unwrap();

        let mut spec = AgentSpec::new("chat-agent", "Chat Agent");
        spec.mcp_servers = vec![ServerSelection {
            id: "fs".into(),
            origin: SelectionOrigin::Catalog,
        }];
        crate::registry::create_agent(&state, spec, false)
            .await
            .unwrap();

        let entry = crate::registry::get_agent(&state, "chat-agent").unwrap();
        let frames: Vec<serde_json::Value> = agent_frame_stream(
            Arc::clone(&state),
            entry,
            RunParams {
                prompt: "hi".into(),
                ..Default::default()
            },
            chat_frames,
        )
        .collect()
        .await;

        let done = frames.last().unwrap();
        assert_eq!(done["type"], "DONE");
        assert_eq!(done["text"], "echo: hi");
    }

    #[test]
    fn tool_end_frames_are_annotated() {
        let frames = chat_frames(StreamItem::Runner(RunnerEvent::ToolCallEnd {
            id: "tc1".into(),
            name: "fs_echo".into(),
            success: false,
            error: Some("nope".into()),
            result: None,
        }));
        assert_eq!(frames[0]["type"], "TOOL_CALL_END");
        assert_eq!(frames[0]["success"], false);
        assert_eq!(frames[0]["error"], "nope");
    }
}
