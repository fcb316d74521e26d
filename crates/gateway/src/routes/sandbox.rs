//! Sandbox reconfiguration routes.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{Json, extract::State},
    serde::Deserialize,
    tracing::info,
};

use agentry_sandbox::{SandboxStatus, SandboxUpdate, SandboxVariant};

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureSandboxRequest {
    #[serde(default)]
    pub variant: Option<SandboxVariant>,
    #[serde(default, rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "toolProxyUrl")]
    pub tool_proxy_url: Option<String>,
    #[serde(default, rename = "envVars")]
    pub env_vars: Option<HashMap<String, String>>,
}

/// `POST /sandbox/configure` — reconfigure the shared sandbox. Agents
/// holding managed proxies observe the swap on their next execution.
pub async fn configure_sandbox(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigureSandboxRequest>,
) -> Result<Json<SandboxStatus>, ApiError> {
    if request.variant == Some(SandboxVariant::RemoteNotebook)
        && request.server_url.is_none()
        && state.sandbox.status().endpoint.is_none()
    {
        return Err(ApiError::unprocessable(
            "remote-notebook sandbox requires a serverUrl",
        ));
    }

    state
        .sandbox
        .configure(SandboxUpdate {
            variant: request.variant,
            server_url: request.server_url,
            token: request.token,
            tool_proxy_url: request.tool_proxy_url,
            env_vars: request.env_vars,
        })
        .await;

    info!("sandbox reconfigured via management API");
    Ok(Json(state.sandbox.status()))
}

/// `GET /sandbox/status`.
pub async fn sandbox_status(State(state): State<Arc<AppState>>) -> Json<SandboxStatus> {
    Json(state.sandbox.status())
}
