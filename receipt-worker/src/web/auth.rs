//! Function key verification for the webhook route.
//!
//! The Functions host normally enforces `authLevel: function` itself. When the
//! handler runs outside the host (or behind a plain proxy) a `FUNCTION_KEY`
//! can be configured and is then checked here, from either the
//! `x-functions-key` header or the `code` query parameter.

use tracing::warn;

/// Header the Functions runtime uses for function keys.
pub const FUNCTION_KEY_HEADER: &str = "x-functions-key";

/// Check a provided key against the configured one.
pub fn verify_function_key(expected: &str, provided: Option<&str>) -> bool {
    let provided = match provided {
        Some(p) if !p.is_empty() => p,
        _ => {
            warn!("function_key_missing");
            return false;
        }
    };

    let valid = constant_time_compare(expected, provided);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = provided.len(),
            "function_key_mismatch"
        );
    }

    valid
}

/// Compare keys without short-circuiting on the first differing byte.
fn constant_time_compare(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len()
        && expected
            .bytes()
            .zip(provided.bytes())
            .fold(0u8, |diff, (x, y)| diff | (x ^ y))
            == 0
}

/// A key made only of whitespace counts as unset.
pub fn is_function_key_enabled(function_key: &Option<String>) -> bool {
    function_key
        .as_deref()
        .is_some_and(|k| !k.trim().is_empty())
}
