//! Client-credentials token source for the identity platform.

use crate::config::AzureConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::resilience::{Credential, CredentialSource, CredentialUnavailable};
use std::time::Duration;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3599;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Fetches app-only tokens with the OAuth2 client-credentials grant.
pub struct AzureTokenSource {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: Secret<String>,
}

impl AzureTokenSource {
    pub fn new(client: Client, config: &AzureConfig) -> Self {
        Self {
            client,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl CredentialSource for AzureTokenSource {
    async fn fetch(&self, scope: &str) -> Result<Credential, CredentialUnavailable> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| CredentialUnavailable::new(scope, format!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CredentialUnavailable::new(scope, format!("token response unreadable: {}", e)))?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error_description.unwrap_or(e.error))
                .unwrap_or_else(|_| body.clone());
            return Err(CredentialUnavailable::new(
                scope,
                format!("token endpoint returned {}: {}", status, reason),
            ));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            CredentialUnavailable::new(scope, format!("token response malformed: {}", e))
        })?;

        let expires_in = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        tracing::info!(scope, expires_in_secs = expires_in.as_secs(), "Access token issued");

        Ok(Credential::new(scope, token.access_token, expires_in))
    }
}
