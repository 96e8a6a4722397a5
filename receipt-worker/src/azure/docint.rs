//! Document Intelligence analyze calls.
//!
//! Analysis is a long-running operation: the POST answers 202 with an
//! `Operation-Location` that is polled until the result is ready.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::azure::credential::preview;
use crate::backend::DocumentAnalyzer;
use crate::error::{Error, Result};

const DOCINT_API_VERSION: &str = "2024-11-30";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Client for one Document Intelligence resource.
pub struct DocumentIntelligenceClient {
    http: Client,
    endpoint: String,
    key: String,
}

impl DocumentIntelligenceClient {
    pub fn new(http: Client, endpoint: &str, key: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
        }
    }

    fn analyze_url(&self, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze",
            self.endpoint, model_id
        )
    }

    async fn poll(&self, operation_location: &str, mut wait: Duration) -> Result<Value> {
        let mut polls = 0u32;

        loop {
            sleep(wait).await;
            polls += 1;

            let response = self
                .http
                .get(operation_location)
                .header(SUBSCRIPTION_KEY_HEADER, &self.key)
                .send()
                .await
                .map_err(|e| Error::upstream("docint", e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::upstream(
                    "docint",
                    format!("poll returned status {}: {}", status, preview(&body)),
                ));
            }

            wait = retry_after(response.headers());

            let operation: AnalyzeOperation = response
                .json()
                .await
                .map_err(|e| Error::upstream("docint", e))?;

            debug!(status = %operation.status, polls = polls, "docint_poll");

            if let Some(result) = outcome(operation)? {
                info!(polls = polls, "docint_analyze_succeeded");
                return Ok(result);
            }
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for DocumentIntelligenceClient {
    async fn analyze(&self, model_id: &str, document: Vec<u8>) -> Result<Value> {
        let size = document.len();
        info!(model_id = model_id, size = size, "docint_analyze_start");

        let response = self
            .http
            .post(self.analyze_url(model_id))
            .query(&[("api-version", DOCINT_API_VERSION)])
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(document)
            .send()
            .await
            .map_err(|e| Error::upstream("docint", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "docint",
                format!("analyze returned status {}: {}", status, preview(&body)),
            ));
        }

        let operation_location = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::upstream("docint", "analyze response had no Operation-Location"))?;

        self.poll(&operation_location, retry_after(response.headers()))
            .await
    }
}

/// `Some(result)` once the operation succeeded, `None` while it is still running.
fn outcome(operation: AnalyzeOperation) -> Result<Option<Value>> {
    match operation.status.as_str() {
        "notStarted" | "running" => Ok(None),
        "succeeded" => Ok(Some(operation.analyze_result.unwrap_or(Value::Null))),
        "failed" | "canceled" => {
            let detail = operation
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error detail".to_string());
            Err(Error::upstream(
                "docint",
                format!("analysis {}: {}", operation.status, preview(&detail)),
            ))
        }
        other => Err(Error::upstream(
            "docint",
            format!("unexpected operation status {:?}", other),
        )),
    }
}

/// Poll delay from `Retry-After` (seconds), else one second.
fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}
