//! Request-scoped identity slot for passing OAuth tokens to tool execution.
//!
//! A task-local cell carries the identities of one logical request. The
//! scope is entered around the *stream-producing future*, not the handler
//! body: streaming transports produce the response after the handler has
//! returned, and skill executors must still see the tokens until the
//! stream drains. Concurrent requests each get their own cell and cannot
//! observe one another.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use {
    agentry_common::MutexExt,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

/// One OAuth identity carried with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub provider: String,
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
}

type IdentityCell = Arc<Mutex<Option<Vec<Identity>>>>;

tokio::task_local! {
    static REQUEST_IDENTITIES: IdentityCell;
}

/// Run `fut` with a fresh identity cell holding `identities`.
///
/// Everything awaited inside `fut` — including spawned-inline streams and
/// tool executions — observes the same cell via [`get_request_identities`].
pub async fn with_identity_scope<F, T>(identities: Option<Vec<Identity>>, fut: F) -> T
where
    F: Future<Output = T>,
{
    if let Some(ref ids) = identities {
        let providers: Vec<&str> = ids.iter().map(|i| i.provider.as_str()).collect();
        debug!(?providers, "entering identity scope");
    }
    let cell: IdentityCell = Arc::new(Mutex::new(identities));
    REQUEST_IDENTITIES.scope(cell, fut).await
}

fn with_cell<T>(f: impl FnOnce(&IdentityCell) -> T) -> Option<T> {
    REQUEST_IDENTITIES.try_with(|cell| f(cell)).ok()
}

/// Replace the identities in the current request's cell. No-op outside an
/// identity scope.
pub fn set_request_identities(identities: Option<Vec<Identity>>) {
    with_cell(|cell| {
        *cell.lock_unpoisoned() = identities;
    });
}

/// Identities of the current request, if any.
pub fn get_request_identities() -> Option<Vec<Identity>> {
    with_cell(|cell| cell.lock_unpoisoned().clone()).flatten()
}

/// Clear the identities in the current request's cell.
pub fn clear_request_identities() {
    set_request_identities(None);
}

/// Env-var names for providers with a conventional name; anything else
/// falls back to `<PROVIDER>_TOKEN`.
fn provider_env_var(provider: &str) -> String {
    match provider {
        "github" => "GITHUB_TOKEN".into(),
        "gitlab" => "GITLAB_TOKEN".into(),
        "google" => "GOOGLE_ACCESS_TOKEN".into(),
        "microsoft" => "AZURE_ACCESS_TOKEN".into(),
        "bitbucket" => "BITBUCKET_TOKEN".into(),
        "linkedin" => "LINKEDIN_ACCESS_TOKEN".into(),
        "kaggle" => "KAGGLE_TOKEN".into(),
        "huggingface" => "HUGGINGFACE_TOKEN".into(),
        "slack" => "SLACK_TOKEN".into(),
        "notion" => "NOTION_TOKEN".into(),
        other => format!("{}_TOKEN", other.to_uppercase()),
    }
}

/// Environment variables for the current request's identities.
pub fn get_identity_env() -> HashMap<String, String> {
    identity_env(&get_request_identities().unwrap_or_default())
}

/// Environment variables for an explicit identity list.
pub fn identity_env(identities: &[Identity]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for identity in identities {
        let provider = identity.provider.to_lowercase();
        if provider.is_empty() || identity.access_token.is_empty() {
            continue;
        }
        let var = provider_env_var(&provider);
        debug!(provider = %provider, var = %var, "mapped identity to env var");
        env.insert(var, identity.access_token.clone());
    }
    env
}
