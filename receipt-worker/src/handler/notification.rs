//! Event Grid notification handling.
//!
//! A batch either carries the subscription handshake, which is answered
//! before anything else is touched, or blob-created events that are
//! downloaded, analyzed and logged one by one.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::backend::{Backend, NotificationClients};
use crate::config::FailurePolicy;
use crate::error::Result;
use crate::event::{parse_subject, EventKind, NotificationBatch, ObjectLocator};
use crate::handler::{log_preview, RECEIPT_MODEL};

/// Outcome of one webhook call, mapped to HTTP by the web layer.
#[derive(Debug)]
pub enum NotificationResponse {
    /// Echo of the subscription validation code, as sent
    Validation(Value),
    /// Number of receipts extracted
    Processed(usize),
    /// The body could not be parsed
    InvalidInput,
    /// Client setup or an aborting upstream fault
    Failed(crate::error::Error),
}

pub struct NotificationHandler {
    backend: Arc<dyn Backend>,
    clients: OnceCell<NotificationClients>,
    policy: FailurePolicy,
}

impl NotificationHandler {
    pub fn new(backend: Arc<dyn Backend>, policy: FailurePolicy) -> Self {
        Self {
            backend,
            clients: OnceCell::new(),
            policy,
        }
    }

    /// Handle one raw request body.
    pub async fn handle(&self, body: &[u8]) -> NotificationResponse {
        let batch = match NotificationBatch::parse(body) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, body_length = body.len(), "receipt_ocr_invalid_json");
                return NotificationResponse::InvalidInput;
            }
        };

        info!(events = batch.len(), "receipt_ocr_received");

        // The handshake short-circuits before any secret or client is touched
        if let Some(code) = batch.validation_code() {
            return match code {
                Ok(code) => {
                    info!("event_grid_subscription_validated");
                    NotificationResponse::Validation(code.clone())
                }
                Err(e) => {
                    warn!(error = %e, "event_grid_validation_malformed");
                    NotificationResponse::InvalidInput
                }
            };
        }

        match self.dispatch(&batch).await {
            Ok(processed) => {
                info!(events = batch.len(), processed = processed, "receipt_ocr_complete");
                NotificationResponse::Processed(processed)
            }
            Err(e) => {
                error!(error = %e, "receipt_ocr_failed");
                NotificationResponse::Failed(e)
            }
        }
    }

    async fn clients(&self) -> Result<&NotificationClients> {
        self.clients
            .get_or_try_init(|| self.backend.connect_notifications())
            .await
    }

    async fn dispatch(&self, batch: &NotificationBatch) -> Result<usize> {
        let clients = self.clients().await?;
        let mut processed = 0;

        for event in &batch.events {
            if event.kind() != EventKind::BlobCreated {
                continue;
            }

            let locator = match parse_subject(&event.subject) {
                Ok(locator) => locator,
                Err(e) => {
                    warn!(subject = %event.subject, error = %e, "receipt_subject_malformed");
                    continue;
                }
            };

            if locator.container != clients.expected_container {
                info!(
                    container = %locator.container,
                    blob = %locator.key,
                    "receipt_skipped_container"
                );
                continue;
            }

            match extract(clients, &locator).await {
                Ok(()) => processed += 1,
                Err(e) if self.policy == FailurePolicy::Isolate => {
                    error!(
                        container = %locator.container,
                        blob = %locator.key,
                        error = %e,
                        "receipt_ocr_item_failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(processed)
    }
}

/// Download one receipt, run OCR and log the result.
async fn extract(clients: &NotificationClients, locator: &ObjectLocator) -> Result<()> {
    info!(container = %locator.container, blob = %locator.key, "receipt_ocr_start");

    let image = clients.blobs.download(&locator.container, &locator.key).await?;
    let result = clients.analyzer.analyze(RECEIPT_MODEL, image).await?;

    info!(
        container = %locator.container,
        blob = %locator.key,
        result = %log_preview(&result),
        "receipt_ocr_result"
    );

    Ok(())
}
