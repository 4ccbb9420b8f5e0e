//! Canonical outbound body for a delivery.
//!
//! The signature is computed over these exact bytes, so the envelope is
//! serialized once per attempt and the same buffer is signed and POSTed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_core::models::{Event, EventId};
use serde::Serialize;

use crate::error::{DeliveryError, Result};

/// Wire form of an event as subscribers see it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    id: EventId,
    event_type: &'a str,
    payload: &'a serde_json::Value,
    received_at: DateTime<Utc>,
    idempotency_key: &'a str,
}

/// Serializes the canonical delivery body for an event.
///
/// # Errors
///
/// Returns `DeliveryError::Serialization` if encoding fails.
pub fn envelope_body(event: &Event) -> Result<Bytes> {
    let envelope = Envelope {
        id: event.id,
        event_type: &event.event_type,
        payload: &event.payload.0,
        received_at: event.received_at,
        idempotency_key: &event.idempotency_key,
    };

    let body = serde_json::to_vec(&envelope)
        .map_err(|e| DeliveryError::serialization(format!("failed to encode envelope: {e}")))?;

    Ok(Bytes::from(body))
}
