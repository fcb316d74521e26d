//! Management routes for agents: CRUD, usage, and runtime retooling.

use std::{collections::HashMap, sync::Arc, sync::atomic::Ordering};

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
    },
    serde::Deserialize,
    tracing::info,
};

use {
    agentry_agents::{AgentSpec, ServerSelection},
    agentry_mcp::merged_server_config,
};

use crate::{
    error::ApiError,
    registry,
    state::{AgentEntry, AppState},
};

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: Vec<ServerSelection>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    #[serde(default, rename = "welcomeMessage")]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, rename = "codeExecution")]
    pub code_execution: bool,
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn agent_document(entry: &AgentEntry) -> serde_json::Value {
    let spec = entry.handle.spec();
    serde_json::json!({
        "id": spec.id,
        "name": spec.name,
        "description": spec.description,
        "mcpServers": entry.handle.selection(),
        "skills": spec.skills,
        "model": entry.handle.model_id(),
        "codeExecution": entry.code_execution.load(Ordering::SeqCst),
        "welcomeMessage": spec.welcome_message,
        "suggestions": spec.suggestions,
        "emoji": spec.emoji,
        "color": spec.color,
    })
}

/// `POST /agents` — create an agent.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let id = request
        .id
        .clone()
        .unwrap_or_else(|| slugify(&request.name));

    let mut spec = AgentSpec::new(&id, &request.name);
    spec.description = request.description;
    spec.mcp_servers = request.mcp_servers;
    spec.skills = request.skills;
    spec.model = request.model;
    spec.system_prompt = request.system_prompt;
    spec.welcome_message = request.welcome_message;
    spec.suggestions = request.suggestions;
    spec.emoji = request.emoji;
    spec.color = request.color;

    let entry = registry::create_agent(&state, spec, request.code_execution).await?;
    Ok((StatusCode::CREATED, Json(agent_document(&entry))))
}

/// `GET /agents` — all registered agents.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<serde_json::Value>> {
    let docs = state
        .agent_ids()
        .into_iter()
        .filter_map(|id| state.agent(&id))
        .map(|entry| agent_document(&entry))
        .collect();
    Json(docs)
}

/// `GET /agents/{id}`.
pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;
    Ok(Json(agent_document(&entry)))
}

/// `DELETE /agents/{id}`.
pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    registry::delete_agent(&state, &agent_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /agents/{id}/usage` — usage snapshot plus context breakdown.
pub async fn get_agent_usage(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    registry::get_agent(&state, &agent_id)?;
    let usage = state
        .tracker
        .snapshot(&agent_id)
        .map(|u| serde_json::to_value(u).unwrap_or_default())
        .unwrap_or_default();
    Ok(Json(serde_json::json!({
        "usage": usage,
        "context": state.tracker.context_details(&agent_id),
    })))
}

/// `POST /agents/{id}/usage/reset`.
pub async fn reset_agent_usage(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    registry::get_agent(&state, &agent_id)?;
    state.tracker.reset_agent(&agent_id);
    Ok(StatusCode::NO_CONTENT)
}

// ── Runtime retooling ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateServersRequest {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: Vec<ServerSelection>,
}

/// `PUT /agents/{id}/mcp-servers` — replace the server selection.
pub async fn update_agent_servers(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<UpdateServersRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;
    entry
        .handle
        .update_providers(request.mcp_servers)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    // An empty selection removes the code-execution toolset; keep the
    // reported flag in sync with the handle.
    entry
        .code_execution
        .store(entry.handle.code_mode_enabled(), Ordering::SeqCst);
    Ok(Json(agent_document(&entry)))
}

#[derive(Debug, Deserialize)]
pub struct CodeExecutionRequest {
    pub enabled: bool,
}

/// `PUT /agents/{id}/code-execution` — toggle the code-execution toolset.
pub async fn set_agent_code_execution(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<CodeExecutionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;
    let applied = entry
        .handle
        .set_code_execution(request.enabled)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !applied {
        return Err(ApiError::unprocessable(
            "code execution could not be enabled for this agent",
        ));
    }
    entry
        .code_execution
        .store(entry.handle.code_mode_enabled(), Ordering::SeqCst);
    Ok(Json(agent_document(&entry)))
}

// ── Per-agent MCP server lifecycle ──────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnvVarEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartServersRequest {
    #[serde(default)]
    pub env_vars: Vec<EnvVarEntry>,
}

/// `POST /agents/{id}/mcp-servers/start` — start every server in the
/// agent's selection, with request-scoped env vars layered into the
/// subprocess environments.
pub async fn start_agent_servers(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(request): Json<StartServersRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;

    let extra_env: HashMap<String, String> = request
        .env_vars
        .into_iter()
        .map(|e| (e.name, e.value))
        .collect();
    info!(
        agent = %agent_id,
        env_vars = extra_env.len(),
        "starting agent MCP servers"
    );

    let mut started = Vec::new();
    let mut failed = serde_json::Map::new();

    for selected in entry.handle.selection() {
        let from_config = selected.origin == agentry_agents::SelectionOrigin::Config;
        let config = if from_config {
            let file = agentry_config::load_config_file(&agentry_config::default_config_path());
            let file_entry = file.mcp_servers.get(&selected.id).cloned();
            merged_server_config(&selected.id, file_entry.as_ref(), true)
        } else {
            merged_server_config(&selected.id, None, false)
        };

        match state
            .lifecycle
            .start_server(&selected.id, config, Some(&extra_env))
            .await
        {
            Ok(_) => started.push(selected.id.clone()),
            Err(e) => {
                failed.insert(selected.id.clone(), serde_json::json!(e.reason));
            },
        }
    }

    Ok(Json(serde_json::json!({
        "started": started,
        "failed": failed,
    })))
}

/// `POST /agents/{id}/mcp-servers/stop` — stop every server in the
/// agent's selection.
pub async fn stop_agent_servers(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entry = registry::get_agent(&state, &agent_id)?;

    let mut stopped = Vec::new();
    for selected in entry.handle.selection() {
        if state
            .lifecycle
            .stop_server(&selected.id, selected.origin.into())
            .await
        {
            stopped.push(selected.id);
        }
    }

    Ok(Json(serde_json::json!({ "stopped": stopped })))
}
