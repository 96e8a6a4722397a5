//! Receipt OCR - Azure Functions custom handler.
//!
//! This library provides the two ingestion paths served by the
//! `receipt-worker` binary:
//! - Event Grid webhook: blob-created notifications are downloaded, run
//!   through the prebuilt receipt model and logged
//! - Blob trigger: the triggering image is analyzed and the full result is
//!   written as `<name>.receipt.json`
//!
//! ## Architecture
//!
//! ```text
//! Functions host → web (axum) → handler → backend traits → azure REST clients
//! ```

pub mod azure;
pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use backend::{AzureBackend, Backend, BlobStore, DocumentAnalyzer, SecretStore};
pub use config::{Config, FailurePolicy};
pub use error::{Error, Result};
pub use event::{parse_subject, ChangeNotification, NotificationBatch, ObjectLocator};
pub use handler::{BlobTriggerHandler, NotificationHandler, NotificationResponse, RECEIPT_MODEL};
pub use web::AppState;
