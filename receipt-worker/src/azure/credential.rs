//! Managed identity access tokens.
//!
//! Inside App Service / Functions the platform injects `IDENTITY_ENDPOINT`
//! and `IDENTITY_HEADER`; elsewhere (VMs, AKS) the instance metadata service
//! is used. Tokens are cached per resource and shared across tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::error::{Error, Result};

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Refresh tokens this many seconds before they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Where tokens come from.
#[derive(Debug, Clone)]
enum TokenSource {
    AppService { endpoint: String, header: String },
    Imds,
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_on: i64,
}

impl AccessToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_on - REFRESH_MARGIN_SECS > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(deserialize_with = "epoch_seconds")]
    expires_on: i64,
}

/// Managed identity credential with a per-resource token cache.
#[derive(Clone)]
pub struct ManagedIdentityCredential {
    inner: Arc<CredentialInner>,
}

struct CredentialInner {
    http: Client,
    source: TokenSource,
    client_id: Option<String>,
    timeout: Duration,
    /// One slot per resource, so a slow fetch only blocks its own resource
    slots: RwLock<HashMap<String, TokenSlot>>,
}

type TokenSlot = Arc<Mutex<Option<AccessToken>>>;

impl ManagedIdentityCredential {
    /// Build a credential. App Service endpoint wins when both parts are set.
    pub fn new(
        http: Client,
        identity_endpoint: Option<String>,
        identity_header: Option<String>,
        client_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        let source = match (identity_endpoint, identity_header) {
            (Some(endpoint), Some(header)) => TokenSource::AppService { endpoint, header },
            _ => TokenSource::Imds,
        };

        Self {
            inner: Arc::new(CredentialInner {
                http,
                source,
                client_id,
                timeout,
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get a bearer token for `resource`, e.g. `https://vault.azure.net`.
    pub async fn token(&self, resource: &str) -> Result<String> {
        let slot = self.slot(resource).await;

        // Held across the fetch so concurrent callers for this resource wait
        // for one refresh instead of each fetching
        let mut cached = slot.lock().await;

        let now = chrono::Utc::now().timestamp();
        if let Some(t) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(t.token.clone());
        }

        let fetched = self.fetch(resource).await?;

        info!(
            resource = resource,
            expires_on = fetched.expires_on,
            "managed_identity_token_acquired"
        );

        let token = fetched.token.clone();
        *cached = Some(fetched);
        Ok(token)
    }

    async fn slot(&self, resource: &str) -> TokenSlot {
        {
            let slots = self.inner.slots.read().await;
            if let Some(slot) = slots.get(resource) {
                return slot.clone();
            }
        }

        let mut slots = self.inner.slots.write().await;
        slots.entry(resource.to_string()).or_default().clone()
    }

    async fn fetch(&self, resource: &str) -> Result<AccessToken> {
        let mut query: Vec<(&str, &str)> = vec![("resource", resource)];
        if let Some(client_id) = &self.inner.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.inner.source {
            TokenSource::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.inner
                    .http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", header)
            }
            TokenSource::Imds => {
                query.push(("api-version", IMDS_API_VERSION));
                self.inner.http.get(IMDS_TOKEN_URL).header("Metadata", "true")
            }
        };

        let response = request
            .query(&query)
            .timeout(self.inner.timeout)
            .send()
            .await
            .map_err(|e| Error::upstream("managed_identity", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "managed_identity",
                format!("status {}: {}", status, preview(&body)),
            ));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream("managed_identity", e))?;

        Ok(AccessToken {
            token: parsed.access_token,
            expires_on: parsed.expires_on,
        })
    }
}

/// First 200 characters of an error body.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Token endpoints report `expires_on` either as a number or a numeric string.
fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Epoch {
        Number(i64),
        Text(String),
    }

    match Epoch::deserialize(deserializer)? {
        Epoch::Number(n) => Ok(n),
        Epoch::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
