//! Custom handler invocation envelopes.
//!
//! For non-HTTP triggers the Functions host POSTs
//! `{"Data": {...}, "Metadata": {...}}` to `/<function name>` and expects
//! `{"Outputs": {...}, "Logs": [...], "ReturnValue": ...}` back.

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Binding name of the triggering blob in `function.json`.
pub const BLOB_BINDING: &str = "receiptBlob";

/// Request the host sends for a blob trigger invocation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationRequest {
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Triggering blob pulled out of an invocation.
#[derive(Debug, Clone)]
pub struct TriggeredBlob {
    /// Blob path as reported by the host, e.g. `raw/photo.jpg`
    pub name: String,
    /// `Properties.Length` when the host supplied it
    pub length: Option<u64>,
    pub content: Vec<u8>,
}

impl InvocationRequest {
    /// Decode the blob binding. Content arrives base64-encoded.
    pub fn triggered_blob(&self) -> Result<TriggeredBlob> {
        let encoded = self
            .data
            .get(BLOB_BINDING)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::MalformedInput(format!("invocation has no {} data", BLOB_BINDING))
            })?;

        let content = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::MalformedInput(format!("blob content is not base64: {}", e)))?;

        // BlobTrigger carries the container prefix; name is the {name} binding
        let name = ["BlobTrigger", "name"]
            .iter()
            .find_map(|k| self.metadata.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| Error::MalformedInput("invocation has no blob name".into()))?;

        let length = self
            .metadata
            .get("Properties")
            .and_then(|p| p.get("Length"))
            .and_then(Value::as_u64);

        Ok(TriggeredBlob {
            name,
            length,
            content,
        })
    }
}

/// Response returned to the host.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvocationResponse {
    pub outputs: Map<String, Value>,
    pub logs: Vec<String>,
    pub return_value: Option<String>,
}

impl InvocationResponse {
    pub fn success(output_url: String) -> Self {
        Self {
            logs: vec![format!("Wrote {}", output_url)],
            return_value: Some(output_url),
            ..Default::default()
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            logs: vec![error.to_string()],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> InvocationRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_triggered_blob() {
        let req = request(json!({
            "Data": {"receiptBlob": "aW1hZ2UtYnl0ZXM="},
            "Metadata": {
                "BlobTrigger": "raw/photo.jpg",
                "name": "photo.jpg",
                "Uri": "https://acct.blob.core.windows.net/raw/photo.jpg",
                "Properties": {"Length": 11, "ContentType": "image/jpeg"}
            }
        }));

        let blob = req.triggered_blob().unwrap();

        assert_eq!(blob.name, "raw/photo.jpg");
        assert_eq!(blob.length, Some(11));
        assert_eq!(blob.content, b"image-bytes".to_vec());
    }

    #[test]
    fn test_triggered_blob_falls_back_to_name() {
        let req = request(json!({
            "Data": {"receiptBlob": ""},
            "Metadata": {"name": "photo.jpg"}
        }));

        let blob = req.triggered_blob().unwrap();

        assert_eq!(blob.name, "photo.jpg");
        assert_eq!(blob.length, None);
        assert!(blob.content.is_empty());
    }

    #[test]
    fn test_triggered_blob_missing_data() {
        let req = request(json!({"Metadata": {"name": "photo.jpg"}}));
        assert!(matches!(req.triggered_blob(), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_triggered_blob_not_base64() {
        let req = request(json!({
            "Data": {"receiptBlob": "%%%"},
            "Metadata": {"name": "photo.jpg"}
        }));
        assert!(matches!(req.triggered_blob(), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_response_shape() {
        let json = serde_json::to_value(InvocationResponse::success(
            "https://acct.blob.core.windows.net/receipts-json/photo.jpg.receipt.json".to_string(),
        ))
        .unwrap();

        assert_eq!(json["Outputs"], json!({}));
        assert_eq!(
            json["ReturnValue"],
            "https://acct.blob.core.windows.net/receipts-json/photo.jpg.receipt.json"
        );
        assert_eq!(json["Logs"].as_array().unwrap().len(), 1);

        let failed =
            serde_json::to_value(InvocationResponse::failure(&Error::missing_env("DOCINT_KEY")))
                .unwrap();
        assert_eq!(failed["ReturnValue"], Value::Null);
        assert_eq!(failed["Logs"][0], "Missing env var: DOCINT_KEY");
    }
}
