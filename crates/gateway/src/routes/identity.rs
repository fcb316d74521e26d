//! Identity OAuth routes: token exchange and userinfo proxying.
//!
//! Most OAuth providers (GitHub, Google, Kaggle) do not allow CORS on
//! their token endpoints, so browser clients need a backend proxy to
//! exchange an authorization code for an access token. The resulting
//! identities flow back into requests (§ identities) and from there into
//! skill executions.
//!
//! Provider quirks handled here: GitHub wants `client_secret` even with
//! PKCE and reports errors as HTTP 200 with an `error` body; Google and
//! Kaggle are standard OAuth 2.1 with PKCE.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    axum::{Json, extract::State},
    serde::Deserialize,
    tracing::info,
};

use agentry_common::RwLockExt;

use crate::{error::ApiError, state::AppState};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint pair for one OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub token_url: String,
    pub userinfo_url: String,
}

/// Provider endpoints plus client-id overrides.
///
/// Client ids and secrets come from `<PROVIDER>_CLIENT_ID` /
/// `<PROVIDER>_CLIENT_SECRET` env vars; `client_ids` entries take
/// precedence so tests can avoid touching the process environment.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub providers: HashMap<String, ProviderEndpoints>,
    pub client_ids: HashMap<String, String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        let providers = HashMap::from([
            (
                "github".to_string(),
                ProviderEndpoints {
                    token_url: "https://github.com/login/oauth/access_token".into(),
                    userinfo_url: "https://api.github.com/user".into(),
                },
            ),
            (
                "google".to_string(),
                ProviderEndpoints {
                    token_url: "https://oauth2.googleapis.com/token".into(),
                    userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo".into(),
                },
            ),
            (
                "kaggle".to_string(),
                ProviderEndpoints {
                    token_url: "https://www.kaggle.com/oauth/token".into(),
                    userinfo_url: "https://www.kaggle.com/api/v1/user/me".into(),
                },
            ),
        ]);
        Self {
            providers,
            client_ids: HashMap::new(),
        }
    }
}

fn provider_endpoints(state: &AppState, provider: &str) -> Result<ProviderEndpoints, ApiError> {
    state
        .oauth
        .read_unpoisoned()
        .providers
        .get(provider)
        .cloned()
        .ok_or_else(|| ApiError::bad_request(format!("unknown provider: {provider}")))
}

fn client_id(state: &AppState, provider: &str) -> Result<String, ApiError> {
    if let Some(id) = state.oauth.read_unpoisoned().client_ids.get(provider) {
        return Ok(id.clone());
    }
    let var = format!("{}_CLIENT_ID", provider.to_uppercase());
    std::env::var(&var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::internal(format!("missing {var} environment variable")))
}

fn client_secret(provider: &str) -> Option<String> {
    std::env::var(format!("{}_CLIENT_SECRET", provider.to_uppercase()))
        .ok()
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct TokenExchangeRequest {
    pub provider: String,
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// `POST /identity/oauth/token` — exchange an authorization code for an
/// access token via the provider's token endpoint. For PKCE flows the
/// client secret is optional; the code verifier provides the security.
pub async fn exchange_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenExchangeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let endpoints = provider_endpoints(&state, &request.provider)?;
    let client_id = client_id(&state, &request.provider)?;

    let mut payload = HashMap::from([
        ("client_id", client_id),
        ("code", request.code.clone()),
        ("code_verifier", request.code_verifier.clone()),
        ("redirect_uri", request.redirect_uri.clone()),
        ("grant_type", "authorization_code".to_string()),
    ]);
    if let Some(secret) = client_secret(&request.provider) {
        payload.insert("client_secret", secret);
    }

    // GitHub answers form-encoded unless asked for JSON explicitly.
    let response = reqwest::Client::new()
        .post(&endpoints.token_url)
        .header("Accept", "application/json")
        .timeout(PROVIDER_TIMEOUT)
        .form(&payload)
        .send()
        .await
        .map_err(|e| {
            ApiError::upstream(format!("failed to connect to {}: {e}", request.provider))
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::upstream(format!(
            "token exchange failed: HTTP {status}: {body}"
        )));
    }

    let token_data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ApiError::upstream(format!("invalid token response: {e}")))?;

    // GitHub reports errors as HTTP 200 with an error body.
    if let Some(error) = token_data.get("error") {
        let detail = token_data["error_description"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(ApiError::bad_request(detail));
    }

    let Some(access_token) = token_data["access_token"].as_str() else {
        return Err(ApiError::upstream("token response missing access_token"));
    };

    info!(provider = %request.provider, "OAuth token exchanged");
    Ok(Json(serde_json::json!({
        "access_token": access_token,
        "token_type": token_data["token_type"].as_str().unwrap_or("Bearer"),
        "expires_in": token_data.get("expires_in"),
        "refresh_token": token_data.get("refresh_token"),
        "scope": token_data.get("scope"),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UserInfoRequest {
    pub provider: String,
    pub access_token: String,
}

/// `POST /identity/oauth/userinfo` — fetch the user behind a token,
/// normalized into `{id, name, email, avatar_url, login, raw}`.
pub async fn get_userinfo(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UserInfoRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let endpoints = provider_endpoints(&state, &request.provider)?;

    let mut builder = reqwest::Client::new()
        .get(&endpoints.userinfo_url)
        .bearer_auth(&request.access_token)
        .header("Accept", "application/json")
        .timeout(PROVIDER_TIMEOUT);
    if request.provider == "github" {
        // GitHub rejects requests without a User-Agent.
        builder = builder.header("User-Agent", "agentry");
    }

    let response = builder.send().await.map_err(|e| {
        ApiError::upstream(format!("failed to connect to {}: {e}", request.provider))
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::upstream(format!(
            "failed to fetch user info: HTTP {status}: {body}"
        )));
    }

    let user: serde_json::Value = response
        .json()
        .await
        .map_err(|e| ApiError::upstream(format!("invalid userinfo response: {e}")))?;

    let normalized = match request.provider.as_str() {
        "github" => serde_json::json!({
            "id": user["id"].as_i64().map(|v| v.to_string()),
            "name": user.get("name"),
            "email": user.get("email"),
            "avatar_url": user.get("avatar_url"),
            "login": user.get("login"),
            "raw": user,
        }),
        "google" => serde_json::json!({
            "id": user.get("sub"),
            "name": user.get("name"),
            "email": user.get("email"),
            "avatar_url": user.get("picture"),
            "login": user.get("email"),
            "raw": user,
        }),
        "kaggle" => serde_json::json!({
            "id": user["id"].as_i64().map(|v| v.to_string()),
            "name": user.get("displayName"),
            "email": user.get("email"),
            "avatar_url": user.get("thumbnailUrl"),
            "login": user.get("userName"),
            "raw": user,
        }),
        _ => serde_json::json!({
            "id": user.get("id").or_else(|| user.get("sub")),
            "name": user.get("name"),
            "email": user.get("email"),
            "avatar_url": user.get("avatar_url").or_else(|| user.get("picture")),
            "login": user.get("login").or_else(|| user.get("username")),
            "raw": user,
        }),
    };

    Ok(Json(normalized))
}
