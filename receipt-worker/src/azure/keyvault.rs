//! Key Vault secret lookups.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::azure::credential::{preview, ManagedIdentityCredential};
use crate::backend::SecretStore;
use crate::error::{Error, Result};

const KEYVAULT_RESOURCE: &str = "https://vault.azure.net";
const KEYVAULT_API_VERSION: &str = "7.4";

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

/// Reads secrets from one vault using a managed identity.
pub struct KeyVaultClient {
    http: Client,
    vault_url: String,
    credential: ManagedIdentityCredential,
    timeout: Duration,
}

impl KeyVaultClient {
    pub fn new(
        http: Client,
        vault_url: &str,
        credential: ManagedIdentityCredential,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            vault_url: vault_url.trim_end_matches('/').to_string(),
            credential,
            timeout,
        }
    }

    fn secret_url(&self, name: &str) -> String {
        format!("{}/secrets/{}", self.vault_url, name)
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let token = self.credential.token(KEYVAULT_RESOURCE).await?;

        let response = self
            .http
            .get(self.secret_url(name))
            .query(&[("api-version", KEYVAULT_API_VERSION)])
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::upstream("keyvault", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "keyvault",
                format!("secret {} returned status {}: {}", name, status, preview(&body)),
            ));
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| Error::upstream("keyvault", e))?;

        info!(secret = name, "keyvault_secret_resolved");

        Ok(bundle.value)
    }
}
