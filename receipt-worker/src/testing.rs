//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{
    Backend, BlobStore, DocumentAnalyzer, NotificationClients, SecretStore, TriggerClients,
};
use crate::config::{Config, FailurePolicy};
use crate::error::{Error, Result};

/// Configuration with every optional setting unset.
pub fn test_config() -> Config {
    Config {
        port: 8080,
        keyvault_url: None,
        storage_account_url: None,
        raw_container: None,
        docint_endpoint: None,
        docint_key: None,
        output_container: "receipts-json".to_string(),
        storage_connection_string: None,
        function_key: None,
        azure_client_id: None,
        identity_endpoint: None,
        identity_header: None,
        failure_policy: FailurePolicy::Isolate,
        request_timeout_ms: 1000,
    }
}

pub struct MockSecrets {
    values: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MockSecrets {
    pub fn new(values: &[(&str, &str)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MockSecrets {
    async fn get_secret(&self, name: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| Error::upstream("keyvault", format!("secret {} not found", name)))
    }
}

/// A recorded upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub container: String,
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub overwrite: bool,
}

#[derive(Default)]
pub struct MockBlobs {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<Vec<Upload>>,
    downloads: AtomicUsize,
}

impl MockBlobs {
    pub fn with_object(self, container: &str, key: &str, bytes: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert((container.to_string(), key.to_string()), bytes.to_vec());
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn object(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MockBlobs {
    async fn download(&self, container: &str, key: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.object(container, key)
            .ok_or_else(|| Error::upstream("blob", format!("{}/{} not found", container, key)))
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        overwrite: bool,
    ) -> Result<String> {
        let slot = (container.to_string(), name.to_string());
        let mut objects = self.objects.lock().unwrap();
        if !overwrite && objects.contains_key(&slot) {
            return Err(Error::upstream("blob", "already exists"));
        }
        objects.insert(slot, bytes.clone());

        self.uploads.lock().unwrap().push(Upload {
            container: container.to_string(),
            name: name.to_string(),
            bytes,
            content_type: content_type.to_string(),
            overwrite,
        });

        Ok(format!("https://mock.blob/{}/{}", container, name))
    }
}

pub struct MockAnalyzer {
    result: Value,
    /// Documents whose bytes equal one of these fail upstream
    failing: HashSet<Vec<u8>>,
    calls: Mutex<Vec<(String, usize)>>,
}

impl MockAnalyzer {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, document: &[u8]) -> Self {
        self.failing.insert(document.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentAnalyzer for MockAnalyzer {
    async fn analyze(&self, model_id: &str, document: Vec<u8>) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), document.len()));
        if self.failing.contains(&document) {
            return Err(Error::upstream("docint", "analysis failed: InvalidContent"));
        }
        Ok(self.result.clone())
    }
}

/// Hands out the same mocks on every connect and counts the calls.
pub struct MockBackend {
    pub blobs: Arc<MockBlobs>,
    pub analyzer: Arc<MockAnalyzer>,
    pub expected_container: String,
    pub output_container: String,
    pub fail_connect: bool,
    connects: AtomicUsize,
}

impl MockBackend {
    pub fn new(blobs: MockBlobs, analyzer: MockAnalyzer) -> Self {
        Self {
            blobs: Arc::new(blobs),
            analyzer: Arc::new(analyzer),
            expected_container: "raw".to_string(),
            output_container: "receipts-json".to_string(),
            fail_connect: false,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(Error::upstream("keyvault", "status 403 Forbidden"));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn connect_notifications(&self) -> Result<NotificationClients> {
        self.connect()?;
        Ok(NotificationClients {
            blobs: self.blobs.clone(),
            analyzer: self.analyzer.clone(),
            expected_container: self.expected_container.clone(),
        })
    }

    async fn connect_trigger(&self) -> Result<TriggerClients> {
        self.connect()?;
        Ok(TriggerClients {
            blobs: self.blobs.clone(),
            analyzer: self.analyzer.clone(),
            output_container: self.output_container.clone(),
        })
    }
}
