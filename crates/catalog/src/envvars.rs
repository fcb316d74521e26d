//! Specs for the environment variables referenced by catalog servers.

use std::collections::HashMap;

use {once_cell::sync::Lazy, serde::Serialize};

/// Specification for one environment variable a server or skill may need.
#[derive(Debug, Clone, Serialize)]
pub struct EnvvarSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "registrationUrl", skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<&'static str>,
}

pub static ENVVAR_CATALOG: Lazy<HashMap<&'static str, EnvvarSpec>> = Lazy::new(|| {
    let entries = [
        EnvvarSpec {
            id: "GITHUB_TOKEN",
            name: "GitHub Token",
            description: "Personal access token for the GitHub API",
            registration_url: Some("https://github.com/settings/tokens"),
        },
        EnvvarSpec {
            id: "TAVILY_API_KEY",
            name: "Tavily API Key",
            description: "API key for the Tavily search service",
            registration_url: Some("https://tavily.com"),
        },
        EnvvarSpec {
            id: "KAGGLE_TOKEN",
            name: "Kaggle Token",
            description: "API token for Kaggle datasets",
            registration_url: Some("https://www.kaggle.com/settings"),
        },
    ];
    entries.into_iter().map(|e| (e.id, e)).collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envvar_ids_match_keys() {
        for (key, spec) in ENVVAR_CATALOG.iter() {
            assert_eq!(*key, spec.id);
        }
    }
}
