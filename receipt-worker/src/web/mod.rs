//! Web server module for the Functions custom handler.
//!
//! The Functions host forwards two kinds of calls here:
//! - the HTTP-triggered Event Grid webhook, forwarded as-is
//! - blob trigger invocations, wrapped in the custom handler envelope

pub mod auth;
pub mod handlers;
pub mod invocation;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::{is_function_key_enabled, verify_function_key};
pub use handlers::{health, receipt_blob_trigger, receipt_ocr, AppState, HealthResponse};
pub use invocation::{InvocationRequest, InvocationResponse, TriggeredBlob};

/// Route of the Event Grid webhook (`api/` prefix added by the host).
pub const RECEIPT_OCR_ROUTE: &str = "/api/receipt-ocr";

/// Route the host posts blob trigger invocations to (the function name).
pub const BLOB_TRIGGER_ROUTE: &str = "/receipt-blob-trigger";

/// Invocations carry the whole image base64-encoded.
const MAX_INVOCATION_BYTES: usize = 64 * 1024 * 1024;

/// Build the router for both functions.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(RECEIPT_OCR_ROUTE, post(receipt_ocr))
        .route(
            BLOB_TRIGGER_ROUTE,
            post(receipt_blob_trigger).layer(DefaultBodyLimit::max(MAX_INVOCATION_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
