//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup. Values a handler cannot run without
//! are kept optional here and checked with [`Config::require`] the first time
//! that handler dispatches, so the handshake path never depends on them.

use std::env;
use tracing::warn;

use crate::error::{Error, Result};

/// Default container for extraction results written by the blob trigger.
pub const DEFAULT_OUTPUT_CONTAINER: &str = "receipts-json";

/// What the notification handler does when one receipt fails upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure, skip that notification and keep going.
    Isolate,
    /// Stop at the first failure and answer 500.
    Abort,
}

impl FailurePolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "isolate" => Some(FailurePolicy::Isolate),
            "abort" => Some(FailurePolicy::Abort),
            _ => None,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the custom handler to listen on
    pub port: u16,

    /// Key Vault holding the Document Intelligence endpoint and key
    pub keyvault_url: Option<String>,

    /// Blob account URL used with managed identity (e.g. https://acct.blob.core.windows.net)
    pub storage_account_url: Option<String>,

    /// Only notifications for this container are processed
    pub raw_container: Option<String>,

    /// Document Intelligence endpoint for the blob trigger
    pub docint_endpoint: Option<String>,

    /// Document Intelligence key for the blob trigger
    pub docint_key: Option<String>,

    /// Container the blob trigger writes results into
    pub output_container: String,

    /// Storage connection string for the blob trigger
    pub storage_connection_string: Option<String>,

    /// Shared secret expected in `x-functions-key` / `code`
    pub function_key: Option<String>,

    /// Client id of a user-assigned managed identity
    pub azure_client_id: Option<String>,

    /// Managed identity endpoint injected by App Service / Functions
    pub identity_endpoint: Option<String>,

    /// Secret header value paired with `identity_endpoint`
    pub identity_header: Option<String>,

    pub failure_policy: FailurePolicy,

    /// HTTP timeout in milliseconds for token, secret and storage calls
    pub request_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            // The host injects the first; PORT is for running outside it
            port: ["FUNCTIONS_CUSTOMHANDLER_PORT", "PORT"]
                .iter()
                .find_map(|name| non_empty(name).and_then(|v| v.parse().ok()))
                .unwrap_or(8080),

            keyvault_url: non_empty("KEYVAULT_URL"),

            storage_account_url: non_empty("STORAGE_ACCOUNT_URL"),

            raw_container: non_empty("RAW_CONTAINER"),

            docint_endpoint: non_empty("DOCINT_ENDPOINT"),

            docint_key: non_empty("DOCINT_KEY"),

            output_container: non_empty("OUTPUT_CONTAINER")
                .unwrap_or_else(|| DEFAULT_OUTPUT_CONTAINER.to_string()),

            storage_connection_string: non_empty("STORAGE_CONNECTION_STRING")
                .or_else(|| non_empty("AzureWebJobsStorage")),

            function_key: non_empty("FUNCTION_KEY"),

            azure_client_id: non_empty("AZURE_CLIENT_ID"),

            identity_endpoint: non_empty("IDENTITY_ENDPOINT"),

            identity_header: non_empty("IDENTITY_HEADER"),

            failure_policy: parse_policy("NOTIFICATION_FAILURE_POLICY", FailurePolicy::Isolate),

            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
        }
    }

    /// Unwrap a required setting or fail with a configuration error naming it.
    pub fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value.as_deref().ok_or_else(|| Error::missing_env(name))
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_policy(name: &str, default: FailurePolicy) -> FailurePolicy {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    FailurePolicy::parse(&raw).unwrap_or_else(|| {
        warn!(env_var = name, value = %raw, "Invalid failure policy, using default");
        default
    })
}
