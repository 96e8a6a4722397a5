//! Notification payload types.
//!
//! Event Grid posts either a single event object or an array of them. Both
//! shapes are normalized into a [`NotificationBatch`].

use serde_json::Value;

use crate::error::{Error, Result};

/// Event type of the one-time subscription handshake.
pub const SUBSCRIPTION_VALIDATION_EVENT: &str = "Microsoft.EventGrid.SubscriptionValidationEvent";

/// Event types that announce a newly created blob.
pub const BLOB_CREATED_EVENTS: &[&str] = &["Microsoft.Storage.BlobCreated", "BlobCreated"];

/// How the handler treats a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionValidation,
    BlobCreated,
    Other,
}

/// One reported storage mutation.
///
/// Fields are read leniently: a missing, null or non-string `eventType` or
/// `subject` becomes empty, so one odd element is skipped instead of failing
/// the whole batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeNotification {
    /// Event type tag (`type` in the CloudEvents schema)
    pub event_type: String,
    /// Path-like subject, e.g. `/blobServices/default/containers/raw/blobs/a.jpg`
    pub subject: String,
    /// Type-specific payload, passed through untouched
    pub data: Value,
}

impl ChangeNotification {
    /// Build a notification from one element of the batch.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let event_type = match text("eventType") {
            t if t.is_empty() => text("type"),
            t => t,
        };

        Self {
            event_type,
            subject: text("subject"),
            data: value.get("data").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn kind(&self) -> EventKind {
        if self.event_type == SUBSCRIPTION_VALIDATION_EVENT {
            EventKind::SubscriptionValidation
        } else if BLOB_CREATED_EVENTS.contains(&self.event_type.as_str()) {
            EventKind::BlobCreated
        } else {
            EventKind::Other
        }
    }

    /// The `data.validationCode` of a handshake event, echoed as sent.
    pub fn validation_code(&self) -> Option<&Value> {
        self.data.get("validationCode").filter(|v| !v.is_null())
    }
}

/// All notifications delivered in one webhook call.
#[derive(Debug, Clone, Default)]
pub struct NotificationBatch {
    pub events: Vec<ChangeNotification>,
}

impl NotificationBatch {
    /// Parse a request body. A lone object becomes a one-element batch.
    ///
    /// Only bodies that are not JSON, or whose top level is a scalar, are
    /// rejected.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)?;

        let events = match value {
            Value::Array(items) => items.iter().map(ChangeNotification::from_value).collect(),
            Value::Object(_) => vec![ChangeNotification::from_value(&value)],
            other => {
                return Err(Error::MalformedInput(format!(
                    "expected an event object or array, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(Self { events })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Find the handshake event, if any, and return its validation code.
    ///
    /// A handshake without a code is malformed input.
    pub fn validation_code(&self) -> Option<Result<&Value>> {
        self.events
            .iter()
            .find(|e| e.kind() == EventKind::SubscriptionValidation)
            .map(|e| {
                e.validation_code().ok_or_else(|| {
                    Error::MalformedInput("validation event without data.validationCode".into())
                })
            })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
