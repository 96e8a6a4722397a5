//! Custom handler endpoints.
//!
//! These handlers only translate between HTTP and the ingestion handlers:
//! 1. Verify the function key (webhook only, when configured)
//! 2. Hand the body to the matching handler
//! 3. Map the outcome to a status code and body

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::error::Error;
use crate::handler::{BlobTriggerHandler, NotificationHandler, NotificationResponse};
use crate::web::auth::{is_function_key_enabled, verify_function_key, FUNCTION_KEY_HEADER};
use crate::web::invocation::{InvocationRequest, InvocationResponse};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub notifications: Arc<NotificationHandler>,
    pub trigger: Arc<BlobTriggerHandler>,
}

impl AppState {
    pub fn new(config: Arc<Config>, backend: Arc<dyn Backend>) -> Self {
        Self {
            notifications: Arc::new(NotificationHandler::new(
                backend.clone(),
                config.failure_policy,
            )),
            trigger: Arc::new(BlobTriggerHandler::new(backend)),
            config,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Event Grid Webhook
// =============================================================================

/// Query string of the webhook; only the function key is read.
#[derive(Debug, Default, Deserialize)]
pub struct FunctionKeyQuery {
    pub code: Option<String>,
}

/// Body of the subscription handshake answer.
#[derive(Serialize)]
pub struct ValidationResponse {
    #[serde(rename = "validationResponse")]
    pub validation_response: Value,
}

impl IntoResponse for NotificationResponse {
    fn into_response(self) -> Response {
        match self {
            NotificationResponse::Validation(code) => (
                StatusCode::OK,
                Json(ValidationResponse {
                    validation_response: code,
                }),
            )
                .into_response(),
            NotificationResponse::Processed(count) => (
                StatusCode::OK,
                format!("OK. OCR processed {} receipt(s).", count),
            )
                .into_response(),
            NotificationResponse::InvalidInput => {
                (StatusCode::BAD_REQUEST, "Invalid JSON").into_response()
            }
            NotificationResponse::Failed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Event Grid webhook endpoint.
///
/// Accepts a single event or an array, answers the subscription handshake,
/// and runs OCR on blob-created events for the configured container.
pub async fn receipt_ocr(
    State(state): State<AppState>,
    Query(query): Query<FunctionKeyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if is_function_key_enabled(&state.config.function_key) {
        let expected = state.config.function_key.as_deref().unwrap_or_default();
        let provided = headers
            .get(FUNCTION_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .or(query.code.as_deref());

        if !verify_function_key(expected, provided) {
            warn!("receipt_ocr_unauthorized");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    state.notifications.handle(&body).await.into_response()
}

// =============================================================================
// Blob Trigger Invocation
// =============================================================================

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::MalformedInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Blob trigger endpoint, called by the Functions host.
///
/// Any non-2xx answer marks the invocation as failed; redelivery is up to
/// the host.
pub async fn receipt_blob_trigger(
    State(state): State<AppState>,
    Json(request): Json<InvocationRequest>,
) -> (StatusCode, Json<InvocationResponse>) {
    let blob = match request.triggered_blob() {
        Ok(blob) => blob,
        Err(e) => {
            warn!(error = %e, "blob_trigger_invalid_invocation");
            return (status_for(&e), Json(InvocationResponse::failure(&e)));
        }
    };

    info!(name = %blob.name, size = blob.content.len(), "blob_trigger_invoked");

    match state
        .trigger
        .handle(&blob.name, blob.length, &blob.content[..])
        .await
    {
        Ok(url) => (StatusCode::OK, Json(InvocationResponse::success(url))),
        Err(e) => {
            error!(name = %blob.name, error = %e, "blob_trigger_failed");
            (status_for(&e), Json(InvocationResponse::failure(&e)))
        }
    }
}
