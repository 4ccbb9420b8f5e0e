//! Input validation shared by the ingestion and admin surfaces.

use crate::error::RelayError;

/// Maximum serialized payload size accepted from producers: 1 MiB.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Checks the event type grammar: `^[A-Za-z0-9._-]+$`, non-empty.
pub fn is_valid_event_type(event_type: &str) -> bool {
    !event_type.is_empty()
        && event_type.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Validates a subscription target URL.
///
/// Accepts absolute http/https URLs with a host. Everything else is rejected
/// with `INVALID_URL`.
pub fn validate_target_url(target_url: &str) -> Result<(), RelayError> {
    let parsed = url::Url::parse(target_url)
        .map_err(|e| RelayError::InvalidUrl { message: format!("not an absolute URL: {e}") })?;

    match parsed.scheme() {
        "http" | "https" => {},
        scheme => {
            return Err(RelayError::InvalidUrl {
                message: format!("unsupported scheme: {scheme}"),
            });
        },
    }

    if parsed.host_str().is_none() {
        return Err(RelayError::InvalidUrl { message: "URL must have a host".to_string() });
    }

    Ok(())
}
