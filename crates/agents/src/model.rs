//! Model-binding seam. Concrete LLM providers live outside the host and
//! plug in through [`ModelBinding`] / [`BindingFactory`].

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait};

use agentry_context::get_model_context_window;

/// One model binding: a language model reachable for completion calls.
#[async_trait]
pub trait ModelBinding: Send + Sync {
    /// Provider name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Model identifier (e.g. "anthropic:claude-sonnet-4").
    fn model_id(&self) -> &str;

    async fn complete(
        &self,
        messages: &[serde_json::Value],
        tools: &[serde_json::Value],
    ) -> Result<CompletionResponse>;

    /// Whether this binding supports native tool/function calling.
    fn supports_tools(&self) -> bool {
        false
    }

    /// Context window size in tokens for this model.
    fn context_window(&self) -> u32 {
        get_model_context_window(self.model_id())
    }
}

/// Resolves a model identifier to a binding; per-request model overrides
/// go through here.
pub trait BindingFactory: Send + Sync {
    fn bind(&self, model: &str) -> Result<Arc<dyn ModelBinding>>;
}

/// Response from one completion call.
#[derive(Debug, Default)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// Development binding: echoes the last user message. Lets the host run
/// end-to-end without any provider credentials.
pub struct EchoBinding {
    model_id: String,
}

impl EchoBinding {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl ModelBinding for EchoBinding {
    fn name(&self) -> &str {
        "echo"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(
        &self,
        messages: &[serde_json::Value],
        _tools: &[serde_json::Value],
    ) -> Result<CompletionResponse> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m["role"] == "user")
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default();
        let text = format!("echo: {last_user}");
        let estimated_input: u64 = messages
            .iter()
            .map(|m| (m["content"].as_str().unwrap_or_default().len() / 4) as u64)
            .sum();
        Ok(CompletionResponse {
            text: Some(text.clone()),
            tool_calls: Vec::new(),
            usage: Usage {
                input_tokens: estimated_input,
                output_tokens: (text.len() / 4) as u64,
                ..Default::default()
            },
        })
    }
}

/// Factory producing [`EchoBinding`]s for any model id.
pub struct EchoBindingFactory;

impl BindingFactory for EchoBindingFactory {
    fn bind(&self, model: &str) -> Result<Arc<dyn ModelBinding>> {
        Ok(Arc::new(EchoBinding::new(model)))
    }
}
