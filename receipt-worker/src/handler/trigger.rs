//! Blob trigger handling: OCR one uploaded receipt and store the full
//! result next to the other extractions.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tracing::info;

use crate::backend::{Backend, TriggerClients};
use crate::error::{Error, Result};
use crate::handler::RECEIPT_MODEL;

/// Appended to the input file name to form the output name.
pub const OUTPUT_SUFFIX: &str = ".receipt.json";

const JSON_CONTENT_TYPE: &str = "application/json";

/// `raw/2024/photo.jpg` → `photo.jpg.receipt.json`
pub fn output_name(input: &str) -> Result<String> {
    let base = input.rsplit('/').next().unwrap_or(input);
    if base.is_empty() {
        return Err(Error::MalformedInput(format!(
            "blob name {:?} has no file name",
            input
        )));
    }
    Ok(format!("{}{}", base, OUTPUT_SUFFIX))
}

pub struct BlobTriggerHandler {
    backend: Arc<dyn Backend>,
    clients: OnceCell<TriggerClients>,
}

impl BlobTriggerHandler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            clients: OnceCell::new(),
        }
    }

    async fn clients(&self) -> Result<&TriggerClients> {
        self.clients
            .get_or_try_init(|| self.backend.connect_trigger())
            .await
    }

    /// Analyze the triggering blob and write `<name>.receipt.json`.
    ///
    /// Returns the URL of the written result. The output is overwritten on
    /// redelivery, so running twice leaves a single object.
    pub async fn handle<R>(&self, name: &str, declared_length: Option<u64>, mut content: R) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let output = output_name(name)?;

        let mut image = Vec::new();
        content
            .read_to_end(&mut image)
            .await
            .map_err(|e| Error::MalformedInput(format!("failed to read blob {}: {}", name, e)))?;

        info!(
            name = name,
            declared_length = ?declared_length,
            size = image.len(),
            "blob_trigger_received"
        );

        let clients = self.clients().await?;
        let input_size = image.len();

        let result = clients.analyzer.analyze(RECEIPT_MODEL, image).await?;

        let document = serde_json::to_vec_pretty(&result)
            .map_err(|e| Error::upstream("docint", format!("result not serializable: {}", e)))?;

        let url = clients
            .blobs
            .upload(
                &clients.output_container,
                &output,
                document,
                JSON_CONTENT_TYPE,
                true,
            )
            .await?;

        info!(
            name = name,
            input_size = input_size,
            output_url = %url,
            "blob_trigger_complete"
        );

        Ok(url)
    }
}
