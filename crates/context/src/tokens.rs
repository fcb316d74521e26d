//! Token counting and model context-window lookup.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Token counter seam. The host ships an estimating implementation; a
/// binding backed by a real tokenizer can be plugged in where accuracy
/// matters.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    fn count_tokens_json(&self, value: &serde_json::Value) -> usize {
        match serde_json::to_string(value) {
            Ok(json) => self.count_tokens(&json),
            Err(_) => self.count_tokens(&value.to_string()),
        }
    }
}

/// Fallback tokenizer: ~4 characters per token for English text.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }
}

/// Default context window when the model is unknown.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// Known model context windows, keyed by bare model name.
static MODEL_CONTEXT_WINDOWS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        // Anthropic
        ("claude-3-opus", 200_000),
        ("claude-3-sonnet", 200_000),
        ("claude-3-haiku", 200_000),
        ("claude-3.5-sonnet", 200_000),
        ("claude-3.5-haiku", 200_000),
        ("claude-sonnet-4", 200_000),
        ("claude-opus-4", 200_000),
        // OpenAI
        ("gpt-4", 8_192),
        ("gpt-4-32k", 32_768),
        ("gpt-4-turbo", 128_000),
        ("gpt-4o", 128_000),
        ("gpt-4o-mini", 128_000),
        ("gpt-4.1", 1_000_000),
        ("gpt-4.1-mini", 1_000_000),
        ("o1", 200_000),
        ("o1-mini", 128_000),
        ("o3", 200_000),
        ("o3-mini", 200_000),
        ("gpt-3.5-turbo", 16_385),
        // Google
        ("gemini-pro", 32_000),
        ("gemini-1.5-pro", 2_000_000),
        ("gemini-1.5-flash", 1_000_000),
        ("gemini-2.0-flash", 1_000_000),
        ("gemini-2.5-pro", 1_000_000),
        // Mistral
        ("mistral-small", 32_000),
        ("mistral-large", 128_000),
        // Llama-family
        ("llama-3.1-70b", 131_072),
        ("llama-3.1-8b", 131_072),
        ("mixtral-8x7b", 32_768),
    ])
});

/// Context window for a model identifier.
///
/// A `provider:model` prefix is stripped first; after an exact match
/// fails, prefix matching handles dated/versioned ids like
/// `claude-sonnet-4-20250514`. Unknown models get the 128k default.
pub fn get_model_context_window(model: &str) -> u32 {
    let model_name = model.split_once(':').map(|(_, m)| m).unwrap_or(model);

    if let Some(window) = MODEL_CONTEXT_WINDOWS.get(model_name) {
        return *window;
    }

    let lower = model_name.to_lowercase();
    // Longest key first so `gpt-4o` wins over `gpt-4` for `gpt-4o-2024…`.
    let mut keys: Vec<&&str> = MODEL_CONTEXT_WINDOWS.keys().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    for key in keys {
        if lower.starts_with(*key) || lower.contains(*key) {
            return MODEL_CONTEXT_WINDOWS[*key];
        }
    }

    DEFAULT_CONTEXT_WINDOW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimator_is_len_over_four() {
        let t = EstimatingTokenizer;
        assert_eq!(t.count_tokens(""), 0);
        assert_eq!(t.count_tokens("abcd"), 1);
        assert_eq!(t.count_tokens("abcdefg"), 1);
        assert_eq!(t.count_tokens("abcdefgh"), 2);
    }

    #[test]
    fn json_counting_uses_serialized_form() {
        let t = EstimatingTokenizer;
        let value = serde_json::json!({"name": "read_file"});
        assert_eq!(t.count_tokens_json(&value), value.to_string().len() / 4);
    }

    #[test]
    fn exact_match_after_prefix_strip() {
        assert_eq!(get_model_context_window("openai:gpt-4o"), 128_000);
        assert_eq!(get_model_context_window("gpt-4"), 8_192);
    }

    #[test]
    fn versioned_model_prefix_matches() {
        assert_eq!(
            get_model_context_window("anthropic:claude-sonnet-4-20250514"),
            200_000
        );
        assert_eq!(get_model_context_window("gpt-4o-2024-08-06"), 128_000);
    }

    #[test]
    fn unknown_model_gets_default() {
        assert_eq!(get_model_context_window("somebody:mystery-model"), 128_000);
    }
}
