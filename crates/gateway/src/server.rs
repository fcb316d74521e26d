//! Router assembly and serving.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        routing::{delete, get, post, put},
    },
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use crate::{
    routes::{agents, health, identity, mcp, proxy, sandbox},
    state::AppState,
    transports::{a2a, agui, chat, ws},
};

/// Build the gateway router: management API and transports under
/// `/api/v1`, health probes at the root.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Agent management
        .route("/agents", post(agents::create_agent).get(agents::list_agents))
        .route(
            "/agents/{id}",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/agents/{id}/usage", get(agents::get_agent_usage))
        .route("/agents/{id}/usage/reset", post(agents::reset_agent_usage))
        .route("/agents/{id}/mcp-servers", put(agents::update_agent_servers))
        .route(
            "/agents/{id}/code-execution",
            put(agents::set_agent_code_execution),
        )
        .route(
            "/agents/{id}/mcp-servers/start",
            post(agents::start_agent_servers),
        )
        .route(
            "/agents/{id}/mcp-servers/stop",
            post(agents::stop_agent_servers),
        )
        // Transports
        .route("/agents/{id}/ws", get(ws::handle))
        .route("/agents/{id}/agui", post(agui::handle))
        .route("/agents/{id}/chat", post(chat::handle))
        .route("/agents/{id}/card", get(a2a::card))
        .route("/agents/{id}/a2a", post(a2a::handle))
        // MCP server management
        .route("/mcp/servers", get(mcp::get_running_servers))
        .route("/mcp/servers/catalog", get(mcp::get_catalog_servers))
        .route("/mcp/servers/config", get(mcp::get_config_servers))
        .route("/mcp/servers/available", get(mcp::get_available_servers))
        .route(
            "/mcp/servers/catalog/{id}/enable",
            post(mcp::enable_catalog_server),
        )
        .route(
            "/mcp/servers/catalog/{id}/disable",
            delete(mcp::disable_catalog_server),
        )
        // Identity OAuth proxy
        .route("/identity/oauth/token", post(identity::exchange_token))
        .route("/identity/oauth/userinfo", post(identity::get_userinfo))
        // Sandbox management
        .route("/sandbox/configure", post(sandbox::configure_sandbox))
        .route("/sandbox/status", get(sandbox::sandbox_status))
        // Tool-call proxy
        .route("/tool/{toolset}/{tool_name}", post(proxy::call_tool));

    Router::new()
        .nest("/api/v1", api)
        .route("/health/startup", get(health::startup))
        .route("/health/readiness", get(health::readiness))
        .route("/health/liveness", get(health::liveness))
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the gateway until shutdown, then stop MCP servers and the
/// sandbox. Config-file servers start in the background so the listener
/// is up immediately; `/health/startup` reports when they are done.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    skip_config_servers: bool,
) -> anyhow::Result<()> {
    if skip_config_servers {
        info!("config MCP server startup skipped");
    } else {
        let lifecycle = Arc::clone(&state.lifecycle);
        tokio::spawn(async move {
            lifecycle.start_from_config_file().await;
        });
    }

    let router = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "agentry gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down: stopping MCP servers and sandbox");
    state.lifecycle.shutdown().await;
    state.sandbox.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
