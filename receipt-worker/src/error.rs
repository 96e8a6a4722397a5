//! Error kinds shared by both handlers.
//!
//! Only `MalformedSubject` is recovered per notification. Everything else is
//! fatal to the current invocation unless the notification failure policy
//! says otherwise.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The inbound body could not be parsed.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A notification subject lacked the `containers`/`blobs` markers.
    #[error("malformed subject: {0:?}")]
    MalformedSubject(String),

    /// A required setting is missing or unusable.
    #[error("{0}")]
    Configuration(String),

    /// Secret store, blob storage or the extraction service failed.
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
}

impl Error {
    pub fn upstream(service: &'static str, message: impl std::fmt::Display) -> Self {
        Error::Upstream {
            service,
            message: message.to_string(),
        }
    }

    pub fn missing_env(name: &str) -> Self {
        Error::Configuration(format!("Missing env var: {}", name))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_message() {
        let err = Error::missing_env("KEYVAULT_URL");
        assert_eq!(err.to_string(), "Missing env var: KEYVAULT_URL");
    }

    #[test]
    fn test_upstream_message() {
        let err = Error::upstream("keyvault", "status 403");
        assert_eq!(err.to_string(), "keyvault request failed: status 403");
    }
}
