//! T4: agent-to-agent protocol. Card discovery over GET; task submission
//! as JSON-RPC with `task/notification` push frames over SSE and a final
//! JSON-RPC response frame carrying the task result.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
        response::{
            IntoResponse, Response,
            sse::{KeepAlive, Sse},
        },
    },
    futures::StreamExt,
    tracing::info,
};

use {
    agentry_agents::RunnerEvent,
    agentry_mcp::types::JsonRpcRequest,
};

use crate::{
    error::ApiError,
    registry,
    state::AppState,
    transports::{RunParams, StreamItem, agent_frame_stream, message_text, parse_identities,
        sse_from_frames},
};

/// `GET /agents/{id}/card` — discovery document.
pub async fn card(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;
    let spec = entry.handle.spec();
    Ok(Json(serde_json::json!({
        "id": spec.id,
        "name": spec.name,
        "description": spec.description,
        "url": format!("/api/v1/agents/{}/a2a", spec.id),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Frames for a task run: notifications while it runs, then the JSON-RPC
/// response produced by the task-manager completion hook.
fn task_frames(
    request_id: serde_json::Value,
    task_id: String,
) -> impl Fn(StreamItem) -> Vec<serde_json::Value> + Send + 'static {
    move |item| match item {
        StreamItem::Runner(RunnerEvent::Text(text)) => vec![notification(
            &task_id,
            serde_json::json!({"kind": "text", "text": text}),
        )],
        StreamItem::Runner(RunnerEvent::ToolCallStart { id, name, .. }) => vec![notification(
            &task_id,
            serde_json::json!({"kind": "tool-call", "toolCallId": id, "toolCallName": name}),
        )],
        StreamItem::Runner(RunnerEvent::ToolCallEnd { id, success, .. }) => vec![notification(
            &task_id,
            serde_json::json!({"kind": "tool-result", "toolCallId": id, "success": success}),
        )],
        StreamItem::Runner(_) => Vec::new(),
        StreamItem::Completed { text } => vec![serde_json::json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "result": {
                "taskId": task_id,
                "status": "completed",
                "text": text,
            },
        })],
        StreamItem::Failed { message } => vec![serde_json::json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "error": {"code": -32000, "message": message},
        })],
    }
}

fn notification(task_id: &str, event: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "task/notification",
        "params": {"taskId": task_id, "event": event},
    })
}

/// `POST /agents/{id}/a2a` — JSON-RPC task submission (`tasks/send`).
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    let entry = match registry::get_agent(&state, &agent_id) {
        Ok(entry) => entry,
        Err(e) => return e.into_response(),
    };

    if request.method != "tasks/send" {
        return Json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "error": {"code": -32601, "message": format!("unknown method: {}", request.method)},
        }))
        .into_response();
    }

    let params = request.params.clone().unwrap_or(serde_json::Value::Null);
    let prompt = match &params["message"] {
        serde_json::Value::String(text) => text.clone(),
        message @ serde_json::Value::Object(_) => message_text(message),
        _ => String::new(),
    };
    if prompt.is_empty() {
        return Json(serde_json::json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "error": {"code": -32602, "message": "missing 'message'"},
        }))
        .into_response();
    }

    let task_id = params["taskId"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let identities = parse_identities(&params);
    let model = params["model"].as_str().map(String::from);

    info!(agent = %agent_id, task = %task_id, "a2a task submitted");

    let run_params = RunParams {
        prompt,
        history: None,
        model,
        identities,
    };
    let frames = agent_frame_stream(
        state,
        entry,
        run_params,
        task_frames(request.id.clone(), task_id),
    );
    Sse::new(sse_from_frames(frames.boxed()))
        .keep_alive(KeepAlive::default())
        .into_response()
}
