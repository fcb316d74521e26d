//! HTTP transport for remote MCP servers.
//!
//! JSON-RPC requests go over HTTP POST to the server's endpoint; there is
//! no subprocess to supervise, so liveness is a connectivity probe.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    anyhow::{Context, Result, bail},
    reqwest::Client,
    tracing::{debug, warn},
};

use crate::{
    traits::McpTransport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

/// HTTP-based transport for a remote MCP server.
pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a new transport pointing at the given MCP server URL.
    pub fn new(url: &str) -> Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client for MCP transport")?;

        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        }))
    }
}

#[async_trait::async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(method = %method, id = %id, url = %self.url, "HTTP client -> MCP server");

        let http_resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;

        if !http_resp.status().is_success() {
            let status = http_resp.status();
            let body = http_resp.text().await.unwrap_or_default();
            bail!("MCP server returned HTTP {status} for '{method}': {body}");
        }

        let resp: JsonRpcResponse = http_resp
            .json()
            .await
            .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?;

        if let Some(ref err) = resp.error {
            bail!(
                "MCP error on '{method}': code={} message={}",
                err.code,
                err.message
            );
        }

        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };

        let http_resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&notif)
            .send()
            .await
            .with_context(|| format!("POST notification to '{}' for '{method}' failed", self.url))?;

        if !http_resp.status().is_success() {
            let status = http_resp.status();
            warn!(method = %method, %status, "MCP notification returned non-success");
        }

        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.client
            .head(&self.url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn kill(&self) {
        // No persistent connection to tear down.
    }
}
