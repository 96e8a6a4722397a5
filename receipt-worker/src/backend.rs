//! Collaborator contracts and their Azure wiring.
//!
//! Handlers talk to storage, secrets and the extraction service only through
//! these traits. [`Backend`] builds the concrete clients; handlers call it
//! once per worker process and keep the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::info;

use crate::azure::{BlobClient, DocumentIntelligenceClient, KeyVaultClient, ManagedIdentityCredential};
use crate::config::Config;
use crate::error::{Error, Result};

/// Key Vault secret holding the Document Intelligence endpoint.
pub const DOCINT_ENDPOINT_SECRET: &str = "docint-endpoint";

/// Key Vault secret holding the Document Intelligence key.
pub const DOCINT_KEY_SECRET: &str = "docint-key";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a whole object into memory.
    async fn download(&self, container: &str, key: &str) -> Result<Vec<u8>>;

    /// Write an object and return its URL.
    async fn upload(
        &self,
        container: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> Result<String>;
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Run `model_id` over a document and return the raw structured result.
    async fn analyze(&self, model_id: &str, document: Vec<u8>) -> Result<Value>;
}

/// Everything the notification handler needs once the handshake is out of the way.
#[derive(Clone)]
pub struct NotificationClients {
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub expected_container: String,
}

/// Everything the blob trigger handler needs.
#[derive(Clone)]
pub struct TriggerClients {
    pub blobs: Arc<dyn BlobStore>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub output_container: String,
}

/// Builds handler clients. Called lazily, at most once per success.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn connect_notifications(&self) -> Result<NotificationClients>;
    async fn connect_trigger(&self) -> Result<TriggerClients>;
}

/// Look up the Document Intelligence endpoint and key.
pub async fn resolve_docint_secrets(secrets: &dyn SecretStore) -> Result<(String, String)> {
    let endpoint = secrets.get_secret(DOCINT_ENDPOINT_SECRET).await?;
    let key = secrets.get_secret(DOCINT_KEY_SECRET).await?;
    Ok((endpoint, key))
}

/// Production wiring against Azure.
pub struct AzureBackend {
    config: Arc<Config>,
    http: Client,
    credential: ManagedIdentityCredential,
}

impl AzureBackend {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {}", e)))?;

        let credential = ManagedIdentityCredential::new(
            http.clone(),
            config.identity_endpoint.clone(),
            config.identity_header.clone(),
            config.azure_client_id.clone(),
            timeout(&config),
        );

        Ok(Self {
            config,
            http,
            credential,
        })
    }

    fn keyvault(&self, vault_url: &str) -> KeyVaultClient {
        KeyVaultClient::new(
            self.http.clone(),
            vault_url,
            self.credential.clone(),
            timeout(&self.config),
        )
    }
}

fn timeout(config: &Config) -> Duration {
    Duration::from_millis(config.request_timeout_ms)
}

#[async_trait]
impl Backend for AzureBackend {
    async fn connect_notifications(&self) -> Result<NotificationClients> {
        let config = &self.config;
        let vault_url = Config::require(&config.keyvault_url, "KEYVAULT_URL")?;
        let account_url = Config::require(&config.storage_account_url, "STORAGE_ACCOUNT_URL")?;
        let expected_container = Config::require(&config.raw_container, "RAW_CONTAINER")?;

        let (endpoint, key) = resolve_docint_secrets(&self.keyvault(vault_url)).await?;

        let blobs = BlobClient::with_identity(
            self.http.clone(),
            account_url,
            self.credential.clone(),
            timeout(config),
        )?;

        info!(
            account_url = account_url,
            expected_container = expected_container,
            "notification_clients_ready"
        );

        Ok(NotificationClients {
            blobs: Arc::new(blobs),
            analyzer: Arc::new(DocumentIntelligenceClient::new(self.http.clone(), &endpoint, &key)),
            expected_container: expected_container.to_string(),
        })
    }

    async fn connect_trigger(&self) -> Result<TriggerClients> {
        let config = &self.config;
        let connection_string =
            Config::require(&config.storage_connection_string, "STORAGE_CONNECTION_STRING")?;

        // Explicit settings win; otherwise fall back to the vault when one is configured
        let (endpoint, key) = match (&config.docint_endpoint, &config.docint_key, &config.keyvault_url) {
            (Some(endpoint), Some(key), _) => (endpoint.clone(), key.clone()),
            (_, _, Some(vault_url)) => resolve_docint_secrets(&self.keyvault(vault_url)).await?,
            (None, _, None) => return Err(Error::missing_env("DOCINT_ENDPOINT")),
            (Some(_), None, None) => return Err(Error::missing_env("DOCINT_KEY")),
        };

        let blobs =
            BlobClient::from_connection_string(self.http.clone(), connection_string, timeout(config))?;

        info!(
            output_container = %config.output_container,
            "trigger_clients_ready"
        );

        Ok(TriggerClients {
            blobs: Arc::new(blobs),
            analyzer: Arc::new(DocumentIntelligenceClient::new(self.http.clone(), &endpoint, &key)),
            output_container: config.output_container.clone(),
        })
    }
}
