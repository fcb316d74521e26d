//! T1: JSON-RPC over WebSocket.
//!
//! Methods: `initialize`, `session/new`, `session/prompt`. Runner events
//! are pushed as `session/notification` frames while a prompt runs; the
//! prompt's JSON-RPC response carries the final text. Clients that
//! declare the `permissionRequests` capability during `initialize`
//! receive a `session/request_permission` request before every tool
//! call and must answer `{ "allow": bool }`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    axum::{
        extract::{
            Path, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::{IntoResponse, Response},
    },
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, info, warn},
};

use {
    agentry_agents::{ApprovalFn, OnEvent, RunnerEvent},
    agentry_common::MutexExt,
    agentry_context::with_identity_scope,
    agentry_mcp::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

use crate::{
    registry,
    state::{AgentEntry, AppState},
    transports::{StreamItem, chat::chat_frames, parse_identities, record_run},
};

const WS_PROTOCOL_VERSION: &str = "0.1";

type WsSink = SplitSink<WebSocket, Message>;
type PendingPermissions = Arc<Mutex<HashMap<String, oneshot::Sender<bool>>>>;

/// `GET /agents/{id}/ws` — upgrade to the JSON-RPC transport.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match registry::get_agent(&state, &agent_id) {
        Ok(entry) => ws.on_upgrade(move |socket| handle_socket(socket, state, entry)),
        Err(e) => e.into_response(),
    }
}

fn response_frame(id: &serde_json::Value, result: serde_json::Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id: id.clone(),
        result: Some(result),
        error: None,
    }
}

fn error_frame(id: &serde_json::Value, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id: id.clone(),
        result: None,
        error: Some(agentry_mcp::types::JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }),
    }
}

async fn send_json(ws_tx: &mut WsSink, value: &impl serde::Serialize) -> bool {
    match serde_json::to_string(value) {
        Ok(payload) => ws_tx.send(Message::Text(payload.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, entry: Arc<AgentEntry>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn = %conn_id, agent = %entry.handle.agent_id(), "ws: connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Per-connection session histories and capability flags.
    let mut sessions: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    let mut permissions_enabled = false;

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        let request: JsonRpcRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                warn!(conn = %conn_id, error = %e, "ws: invalid frame");
                continue;
            },
        };

        let response = match request.method.as_str() {
            "initialize" => {
                let params = request.params.clone().unwrap_or(serde_json::Value::Null);
                permissions_enabled = params["capabilities"]["permissionRequests"]
                    .as_bool()
                    .unwrap_or(false);
                response_frame(
                    &request.id,
                    serde_json::json!({
                        "protocolVersion": WS_PROTOCOL_VERSION,
                        "serverInfo": {
                            "name": "agentry",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                        "agent": {
                            "id": entry.handle.agent_id(),
                            "name": entry.handle.spec().name,
                            "description": entry.handle.spec().description,
                        },
                        "capabilities": {
                            "permissionRequests": permissions_enabled,
                        },
                    }),
                )
            },
            "session/new" => {
                let session_id = uuid::Uuid::new_v4().to_string();
                sessions.insert(session_id.clone(), Vec::new());
                debug!(conn = %conn_id, session = %session_id, "ws: new session");
                response_frame(&request.id, serde_json::json!({ "sessionId": session_id }))
            },
            "session/prompt" => {
                let params = request.params.clone().unwrap_or(serde_json::Value::Null);
                let prompt = params["prompt"].as_str().unwrap_or_default().to_string();
                if prompt.is_empty() {
                    error_frame(&request.id, -32602, "missing 'prompt'")
                } else {
                    let session_id =
                        params["sessionId"].as_str().unwrap_or("default").to_string();
                    run_prompt(RunPromptArgs {
                        state: &state,
                        entry: &entry,
                        sessions: &mut sessions,
                        session_id,
                        prompt,
                        params,
                        request_id: request.id.clone(),
                        permissions_enabled,
                        ws_tx: &mut ws_tx,
                        ws_rx: &mut ws_rx,
                    })
                    .await
                }
            },
            other => error_frame(&request.id, -32601, &format!("unknown method: {other}")),
        };

        if !send_json(&mut ws_tx, &response).await {
            break;
        }
    }

    info!(conn = %conn_id, "ws: connection closed");
}

struct RunPromptArgs<'a> {
    state: &'a Arc<AppState>,
    entry: &'a Arc<AgentEntry>,
    sessions: &'a mut HashMap<String, Vec<serde_json::Value>>,
    session_id: String,
    prompt: String,
    params: serde_json::Value,
    request_id: serde_json::Value,
    permissions_enabled: bool,
    ws_tx: &'a mut WsSink,
    ws_rx: &'a mut SplitStream<WebSocket>,
}

/// Run one prompt, pushing `session/notification` frames while it runs
/// and relaying permission requests to the client when enabled.
async fn run_prompt(args: RunPromptArgs<'_>) -> JsonRpcResponse {
    let RunPromptArgs {
        state,
        entry,
        sessions,
        session_id,
        prompt,
        params,
        request_id,
        permissions_enabled,
        ws_tx,
        ws_rx,
    } = args;

    let model = params["model"].as_str().map(String::from);
    let identities = parse_identities(&params);
    let history = sessions.get(&session_id).cloned().filter(|h| !h.is_empty());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RunnerEvent>();

    // Permission plumbing: the approval hook posts outbound request
    // frames and waits on a oneshot the socket loop resolves when the
    // client answers.
    let pending: PendingPermissions = Arc::new(Mutex::new(HashMap::new()));
    let (perm_tx, mut perm_rx) = mpsc::unbounded_channel::<String>();
    let permission_timeout = state.permission_timeout();
    let approval: Option<ApprovalFn> = permissions_enabled.then(|| {
        let pending = Arc::clone(&pending);
        let perm_tx = perm_tx.clone();
        let session_id = session_id.clone();
        let hook: ApprovalFn = Box::new(move |tool_name, arguments| {
            let pending = Arc::clone(&pending);
            let perm_tx = perm_tx.clone();
            let session_id = session_id.clone();
            let tool_name = tool_name.to_string();
            let arguments = arguments.clone();
            Box::pin(async move {
                let permission_id = format!("perm-{}", uuid::Uuid::new_v4());
                let (tx, rx) = oneshot::channel();
                pending
                    .lock_unpoisoned()
                    .insert(permission_id.clone(), tx);

                let frame = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": permission_id,
                    "method": "session/request_permission",
                    "params": {
                        "sessionId": session_id,
                        "toolName": tool_name,
                        "arguments": arguments,
                    },
                });
                if perm_tx.send(frame.to_string()).is_err() {
                    return false;
                }

                match tokio::time::timeout(permission_timeout, rx).await {
                    Ok(Ok(allow)) => allow,
                    // No answer means no permission.
                    _ => {
                        warn!(tool = %tool_name, "permission request timed out; denying");
                        false
                    },
                }
            })
        });
        hook
    });

    let handle = Arc::clone(&entry.handle);
    let prompt_owned = prompt.clone();
    let run_fut = with_identity_scope(identities, async move {
        let on_event: OnEvent = Box::new(move |event| {
            let _ = event_tx.send(event);
        });
        handle
            .run(
                &prompt_owned,
                history,
                model.as_deref(),
                Some(&on_event),
                approval.as_ref(),
            )
            .await
    });
    tokio::pin!(run_fut);

    enum Next {
        Event(RunnerEvent),
        EventsClosed,
        Outbound(String),
        Inbound(Option<String>),
        Done(anyhow::Result<agentry_agents::RunResult>),
    }

    let mut events_open = true;
    let result = loop {
        let next = tokio::select! {
            biased;
            event = event_rx.recv(), if events_open => match event {
                Some(event) => Next::Event(event),
                None => Next::EventsClosed,
            },
            Some(frame) = perm_rx.recv() => Next::Outbound(frame),
            incoming = ws_rx.next() => Next::Inbound(match incoming {
                Some(Ok(Message::Text(t))) => Some(t.to_string()),
                Some(Ok(_)) => None,
                _ => {
                    // Client went away; the run is cancelled by dropping
                    // the future when we return.
                    break Err(anyhow::anyhow!("client disconnected"));
                },
            }),
            result = &mut run_fut => Next::Done(result),
        };

        match next {
            Next::Event(event) => {
                send_notifications(ws_tx, &session_id, event).await;
            },
            Next::EventsClosed => events_open = false,
            Next::Outbound(frame) => {
                let _ = ws_tx.send(Message::Text(frame.into())).await;
            },
            Next::Inbound(Some(text)) => resolve_permission(&pending, &text),
            Next::Inbound(None) => {},
            Next::Done(result) => break result,
        }
    };
    while let Ok(event) = event_rx.try_recv() {
        send_notifications(ws_tx, &session_id, event).await;
    }

    match result {
        Ok(run) => {
            record_run(state, entry.handle.agent_id(), &run);
            // Session history excludes the system message the runner
            // prepends on every turn.
            let history: Vec<serde_json::Value> = run
                .messages
                .iter()
                .filter(|m| m["role"] != "system")
                .cloned()
                .collect();
            sessions.insert(session_id.clone(), history);
            response_frame(
                &request_id,
                serde_json::json!({
                    "sessionId": session_id,
                    "text": run.text,
                    "stopReason": "end_turn",
                }),
            )
        },
        Err(e) => {
            warn!(agent = %entry.handle.agent_id(), error = %e, "ws: run failed");
            error_frame(&request_id, -32000, &e.to_string())
        },
    }
}

/// Resolve a pending permission request from a client response frame.
fn resolve_permission(pending: &PendingPermissions, text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    let Some(id) = value["id"].as_str() else {
        return;
    };
    let sender = pending.lock_unpoisoned().remove(id);
    if let Some(sender) = sender {
        let allow = value["result"]["allow"].as_bool().unwrap_or(false);
        debug!(permission = %id, allow, "permission response received");
        let _ = sender.send(allow);
    }
}

async fn send_notifications(ws_tx: &mut WsSink, session_id: &str, event: RunnerEvent) {
    for frame in chat_frames(StreamItem::Runner(event)) {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: "session/notification".into(),
            params: Some(serde_json::json!({
                "sessionId": session_id,
                "event": frame,
            })),
        };
        send_json(ws_tx, &notification).await;
    }
}
