//! Subject path decomposition.
//!
//! Blob event subjects look like
//! `/blobServices/default/containers/<container>/blobs/<key...>`.
//! Keys may contain `/` themselves.

use std::fmt;

use crate::error::{Error, Result};

const CONTAINERS_MARKER: &str = "containers";
const BLOBS_MARKER: &str = "blobs";

/// Container and object key a notification refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocator {
    pub container: String,
    pub key: String,
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Split a subject into `(container, key)`.
///
/// The container is the segment right after `containers`; the key is every
/// segment after the following `blobs` marker, rejoined with `/`.
pub fn parse_subject(subject: &str) -> Result<ObjectLocator> {
    let parts: Vec<&str> = subject.split('/').collect();
    let malformed = || Error::MalformedSubject(subject.to_string());

    let containers_at = parts
        .iter()
        .position(|p| *p == CONTAINERS_MARKER)
        .ok_or_else(malformed)?;

    let container = parts
        .get(containers_at + 1)
        .filter(|c| !c.is_empty())
        .ok_or_else(malformed)?;

    // Search past the container so a container literally named "blobs" still works
    let blobs_at = parts
        .iter()
        .skip(containers_at + 2)
        .position(|p| *p == BLOBS_MARKER)
        .map(|offset| containers_at + 2 + offset)
        .ok_or_else(malformed)?;

    let key = parts[blobs_at + 1..].join("/");
    if key.is_empty() {
        return Err(malformed());
    }

    Ok(ObjectLocator {
        container: container.to_string(),
        key,
    })
}
