//! Tool-call proxy: the HTTP endpoint a remote sandbox uses to invoke
//! provider tools and skill tools on the host.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
    },
    tracing::info,
};

use agentry_mcp::{ProviderAgentTool, ServerToolBridge};

use crate::{error::ApiError, state::AppState};

/// `POST /tool/{toolset}/{tool_name}` — `toolset` is either the literal
/// `skills` or a running MCP server id; the body is the tool arguments.
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path((toolset, tool_name)): Path<(String, String)>,
    Json(arguments): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(toolset = %toolset, tool = %tool_name, "tool proxy call");

    if toolset == "skills" {
        let Some(caller) = state.skills_proxy_caller() else {
            return Err(ApiError::not_found(
                "no skills toolset registered for proxy calls",
            ));
        };
        let result = caller(tool_name, arguments)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        return Ok(Json(result));
    }

    // Anything else resolves against a running server by tool prefix.
    let Some(instance) = state.lifecycle.get_running_server(&toolset, None).await else {
        return Err(ApiError::not_found(format!(
            "no running MCP server '{toolset}'"
        )));
    };

    let prefixed = format!("{toolset}_{tool_name}");
    let Some(tool_def) = instance
        .tool_defs
        .iter()
        .find(|def| def.name == prefixed || def.name == tool_name)
    else {
        return Err(ApiError::not_found(format!(
            "tool '{tool_name}' not found on server '{toolset}'"
        )));
    };

    let bridge = ServerToolBridge::new(&toolset, tool_def, Arc::clone(&instance.client));
    let result = bridge
        .execute(arguments)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::registry::test_support::test_state};

    #[tokio::test]
    async fn proxy_routes_to_running_server() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let mut config = agentry_catalog::McpServer::named("fs", "fs");
        config.command = Some("stub".into());
        state
            .lifecycle
            .start_server("fs", Some(config), None)
            .await
            .unwrap();

        let Json(result) = call_tool(
            State(Arc::clone(&state)),
            Path(("fs".into(), "echo".into())),
            Json(serde_json::json!({"path": "/tmp"})),
        )
        .await
        .unwrap();
        // The stub client echoes the prefixed tool name and arguments.
        assert_eq!(result["tool"], "fs_echo");
        assert_eq!(result["echo"]["path"], "/tmp");
    }

    #[tokio::test]
    async fn unknown_server_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());
        let err = call_tool(
            State(state),
            Path(("ghost".into(), "echo".into())),
            Json(serde_json::json!({})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_tool_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let mut config = agentry_catalog::McpServer::named("fs", "fs");
        config.command = Some("stub".into());
        state
            .lifecycle
            .start_server("fs", Some(config), None)
            .await
            .unwrap();

        let err = call_tool(
            State(state),
            Path(("fs".into(), "missing_tool".into())),
            Json(serde_json::json!({})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn skills_route_uses_registered_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        // Without a registered caller the route is a 404.
        let err = call_tool(
            State(Arc::clone(&state)),
            Path(("skills".into(), "list_skills".into())),
            Json(serde_json::json!({})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        state.set_skills_proxy_caller(Arc::new(|name, _args| {
            Box::pin(async move { Ok(serde_json::json!({"called": name})) })
        }));

        let Json(result) = call_tool(
            State(state),
            Path(("skills".into(), "list_skills".into())),
            Json(serde_json::json!({})),
        )
        .await
        .unwrap();
        assert_eq!(result["called"], "list_skills");
    }
}
