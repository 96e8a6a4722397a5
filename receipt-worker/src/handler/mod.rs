//! The two ingestion paths.
//!
//! ```text
//! Event Grid webhook → NotificationHandler → download → analyze → log
//! Blob trigger       → BlobTriggerHandler  → analyze → upload <name>.receipt.json
//! ```

pub mod notification;
pub mod trigger;

use serde_json::Value;

pub use notification::{NotificationHandler, NotificationResponse};
pub use trigger::{output_name, BlobTriggerHandler, OUTPUT_SUFFIX};

/// Prebuilt Document Intelligence model for retail receipts.
pub const RECEIPT_MODEL: &str = "prebuilt-receipt";

/// Longest extraction result rendering written to the log.
pub const LOG_PREVIEW_CHARS: usize = 3000;

/// Compact JSON of a result, cut to [`LOG_PREVIEW_CHARS`] characters.
pub fn log_preview(result: &Value) -> String {
    let rendered = result.to_string();
    match rendered.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((cut, _)) => rendered[..cut].to_string(),
        None => rendered,
    }
}
