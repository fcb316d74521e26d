//! Health probes. `/health/startup` reads live state — sandbox
//! reconfigurations and server failures are visible on the next poll.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::state::AppState;

/// `GET /health/startup` — initialization and sandbox status.
pub async fn startup(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let failed = state.lifecycle.failed_servers().await;
    Json(serde_json::json!({
        "status": "ok",
        "initialized": state.lifecycle.is_initialized(),
        "agents": state.agent_ids(),
        "sandbox": state.sandbox.status(),
        "failedServers": failed,
    }))
}

/// `GET /health/readiness`.
pub async fn readiness(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.lifecycle.is_initialized() { "ready" } else { "starting" },
    }))
}

/// `GET /health/liveness`.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::registry::test_support::test_state};

    #[tokio::test]
    async fn startup_reflects_sandbox_reconfiguration() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path());

        let Json(before) = startup(State(Arc::clone(&state))).await;
        assert_eq!(before["sandbox"]["variant"], "local-eval");
        assert_eq!(before["initialized"], false);

        state
            .sandbox
            .configure_from_url("http://localhost:8888", None, None)
            .await;

        let Json(after) = startup(State(state)).await;
        assert_eq!(after["sandbox"]["variant"], "remote-notebook");
        assert_eq!(
            after["sandbox"]["toolProxyUrl"],
            "http://127.0.0.1:8765/api/v1/tool"
        );
    }

    #[tokio::test]
    async fn liveness_is_static() {
        let Json(doc) = liveness().await;
        assert_eq!(doc["status"], "alive");
    }
}
