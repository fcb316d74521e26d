//! Management routes for MCP servers: catalog, config, availability,
//! enable/disable.

use std::sync::Arc;

use {
    axum::{Json, extract::{Path, State}, http::StatusCode},
    tracing::info,
};

use {
    agentry_catalog::{McpServer, catalog_server, list_catalog_servers},
    agentry_mcp::Origin,
};

use crate::{error::ApiError, state::AppState};

/// `GET /mcp/servers/catalog` — the predefined servers, with live
/// availability and catalog-origin running state.
pub async fn get_catalog_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<McpServer>>, ApiError> {
    let mut servers = list_catalog_servers();
    for server in &mut servers {
        server.is_running = state
            .lifecycle
            .is_server_running(&server.id, Some(Origin::Catalog))
            .await;
    }
    Ok(Json(servers))
}

/// `GET /mcp/servers/config` — running servers declared in the user
/// config file.
pub async fn get_config_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<McpServer>>, ApiError> {
    let servers = state
        .lifecycle
        .get_origin_servers(Origin::Config)
        .await
        .into_iter()
        .map(|instance| instance.config.clone())
        .collect();
    Ok(Json(servers))
}

/// `GET /mcp/servers/available` — every catalog server (with running
/// state scoped to the catalog origin) plus every running config server.
/// The two origins are independent: the same id may appear twice.
pub async fn get_available_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<McpServer>>, ApiError> {
    let mut result = Vec::new();

    for mut server in list_catalog_servers() {
        if let Some(instance) = state
            .lifecycle
            .get_running_server(&server.id, Some(Origin::Catalog))
            .await
        {
            server.is_running = instance.is_running();
            server.tools = instance.config.tools.clone();
        }
        result.push(server);
    }

    for instance in state.lifecycle.get_origin_servers(Origin::Config).await {
        result.push(instance.config.clone());
    }

    Ok(Json(result))
}

/// `GET /mcp/servers` — all running servers, both origins.
pub async fn get_running_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<McpServer>>, ApiError> {
    let servers = state
        .lifecycle
        .get_all_running_servers()
        .await
        .into_iter()
        .map(|instance| instance.config.clone())
        .collect();
    Ok(Json(servers))
}

/// `POST /mcp/servers/catalog/{id}/enable` — start a predefined server.
/// A config-origin server with the same id is unaffected.
pub async fn enable_catalog_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<(StatusCode, Json<McpServer>), ApiError> {
    let Some(catalog) = catalog_server(&server_id) else {
        let mut available: Vec<&str> = agentry_catalog::SERVER_CATALOG
            .keys()
            .map(String::as_str)
            .collect();
        available.sort_unstable();
        return Err(ApiError::not_found(format!(
            "server '{server_id}' not found in catalog; available: {available:?}"
        )));
    };

    if let Some(instance) = state
        .lifecycle
        .get_running_server(&server_id, Some(Origin::Catalog))
        .await
    {
        info!(server = %server_id, "catalog server already running");
        return Ok((StatusCode::CREATED, Json(instance.config.clone())));
    }

    let mut config = catalog.clone();
    config.is_config = false;

    let instance = state
        .lifecycle
        .start_server(&server_id, Some(config), None)
        .await
        .map_err(ApiError::from)?;

    info!(server = %server_id, "enabled catalog MCP server");
    Ok((StatusCode::CREATED, Json(instance.config.clone())))
}

/// `DELETE /mcp/servers/catalog/{id}/disable` — stop a catalog-origin
/// server.
pub async fn disable_catalog_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state
        .lifecycle
        .is_server_running(&server_id, Some(Origin::Catalog))
        .await
    {
        return Err(ApiError::not_found(format!(
            "server '{server_id}' is not currently enabled in catalog"
        )));
    }

    state.lifecycle.stop_server(&server_id, Origin::Catalog).await;
    info!(server = %server_id, "disabled catalog MCP server");
    Ok(StatusCode::NO_CONTENT)
}
