//! Bearer tokens for the store's REST endpoints.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::AuthConfig;
use crate::errors::{ConfigError, StoreError};

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub struct TokenProvider {
    source: TokenSource,
    cached: Mutex<Option<CachedToken>>,
}

enum TokenSource {
    Static(String),
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
    },
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl TokenProvider {
    pub fn from_config(auth: &AuthConfig, cluster_uri: &str) -> Result<Self, ConfigError> {
        match auth {
            AuthConfig::Token { token } => Ok(Self::fixed(token.clone())),
            AuthConfig::Application {
                tenant_id,
                client_id,
                client_secret,
                authority_host,
            } => {
                let client_secret =
                    client_secret
                        .clone()
                        .ok_or_else(|| ConfigError::MissingField {
                            field: "cluster.auth.client_secret".to_string(),
                        })?;
                let authority = authority_host
                    .as_deref()
                    .unwrap_or(DEFAULT_AUTHORITY_HOST)
                    .trim_end_matches('/');
                Ok(Self::client_credentials(
                    format!("{}/{}/oauth2/v2.0/token", authority, tenant_id),
                    client_id.clone(),
                    client_secret,
                    format!("{}/.default", cluster_uri.trim_end_matches('/')),
                ))
            }
        }
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            cached: Mutex::new(None),
        }
    }

    pub fn client_credentials(
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
    ) -> Self {
        Self {
            source: TokenSource::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            },
            cached: Mutex::new(None),
        }
    }

    /// Returns a usable token, signing in again once the cached one is
    /// close to expiry.
    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String, StoreError> {
        let (token_url, client_id, client_secret, scope) = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ClientCredentials {
                token_url,
                client_id,
                client_secret,
                scope,
            } => (token_url, client_id, client_secret, scope),
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.token.clone());
            }
        }

        debug!("Requesting access token from {}", token_url);
        let response = http
            .post(token_url.as_str())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                endpoint: token_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth {
                reason: format!("token endpoint returned {}: {}", status, body),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| StoreError::Auth {
            reason: format!("unreadable token response: {}", e),
        })?;

        let lifetime = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }
}
