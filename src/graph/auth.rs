use crate::config::Config;
use crate::utils::error::{AppError, AppResult};
use reqwest::Client;
use serde::Deserialize;

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// Acquire an app-only bearer token via the client-credentials flow.
///
/// A single token is fetched at startup and used for the whole run; failure
/// here is fatal, nothing can proceed without Graph access.
pub async fn acquire_token(client: &Client, config: &Config) -> AppResult<String> {
    let client_secret = config.client_secret().ok_or_else(|| {
        AppError::Auth(
            "Client secret not found. Set it in config or use the AVIS_MIRROR_CLIENT_SECRET environment variable".to_string(),
        )
    })?;

    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        LOGIN_BASE, config.graph.tenant_id
    );

    let params = [
        ("client_id", config.graph.client_id.as_str()),
        ("client_secret", client_secret.as_str()),
        ("scope", GRAPH_SCOPE),
        ("grant_type", "client_credentials"),
    ];

    let response = client
        .post(&url)
        .form(&params)
        .send()
        .await
        .map_err(|e| AppError::Network(format!("Token request failed: {}", e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(AppError::Auth(format!(
            "Could not access the Graph API: {} - {}",
            status, error_text
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AppError::Auth(format!("Failed to parse token response: {}", e)))?;

    Ok(token.access_token)
}
