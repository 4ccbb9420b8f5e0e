//! Producer-facing ingestion endpoint.
//!
//! Accepts events exactly once per idempotency key, then enqueues fan-out.
//! The store's unique index is the serialization point: under concurrent
//! requests with the same key exactly one insert wins, and only the winner
//! enqueues fan-out.

use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_core::{
    models::{DeliveryLog, DeliveryLogId, DeliveryStatus, Event, EventId, SubscriptionId},
    validate::{is_valid_event_type, MAX_PAYLOAD_BYTES},
    RelayError,
};
use relay_queue::FanoutJob;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error_response;
use crate::AppState;

/// Request body for event ingestion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngestRequest {
    /// Routing key, `^[A-Za-z0-9._-]+$`.
    pub event_type: String,
    /// Arbitrary JSON object, at most 1 MiB serialized.
    pub payload: serde_json::Value,
}

/// Response from event ingestion; 202 on both fresh and duplicate keys.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Stored event ID; for duplicates, the prior event's ID.
    pub event_id: EventId,
    /// Server receipt time of the stored event.
    pub received_at: DateTime<Utc>,
    /// True when the idempotency key had been seen before.
    pub duplicate: bool,
    /// Handler latency in milliseconds.
    pub processing_ms: u64,
}

/// Event detail plus its delivery history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetailResponse {
    /// Event ID.
    pub id: EventId,
    /// Producer-supplied idempotency key.
    pub idempotency_key: String,
    /// Routing key.
    pub event_type: String,
    /// Stored payload.
    pub payload: serde_json::Value,
    /// Server receipt time.
    pub received_at: DateTime<Utc>,
    /// All delivery attempts, newest first.
    pub delivery_logs: Vec<DeliveryLogResponse>,
}

/// Wire form of one delivery attempt.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogResponse {
    /// Attempt row ID.
    pub id: DeliveryLogId,
    /// Event delivered.
    pub event_id: EventId,
    /// Subscription targeted.
    pub subscription_id: SubscriptionId,
    /// Target URL at attempt time.
    pub target_url: String,
    /// Attempt state.
    pub status: DeliveryStatus,
    /// 1-based attempt number.
    pub attempt_count: i32,
    /// When the attempt started.
    pub attempted_at: DateTime<Utc>,
    /// HTTP status, if a response arrived.
    pub response_status_code: Option<i32>,
    /// Truncated response body.
    pub response_body: Option<String>,
    /// Failure description.
    pub error_message: Option<String>,
}

impl From<DeliveryLog> for DeliveryLogResponse {
    fn from(log: DeliveryLog) -> Self {
        Self {
            id: log.id,
            event_id: log.event_id,
            subscription_id: log.subscription_id,
            target_url: log.target_url,
            status: log.status,
            attempt_count: log.attempt_count,
            attempted_at: log.attempted_at,
            response_status_code: log.response_status_code,
            response_body: log.response_body,
            error_message: log.error_message,
        }
    }
}

/// `POST /api/v1/events`
#[instrument(
    name = "ingest_event",
    skip(state, headers, body),
    fields(
        idempotency_key = headers
            .get("x-idempotency-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none"),
    )
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let idempotency_key = match extract_idempotency_key(&headers) {
        Ok(key) => key,
        Err(e) => return error_response(state.environment, &e),
    };

    let request = match parse_and_validate(&body) {
        Ok(request) => request,
        Err(e) => return error_response(state.environment, &e),
    };

    let insert = match state
        .storage
        .events
        .create(&idempotency_key, &request.event_type, request.payload, state.clock.now())
        .await
    {
        Ok(insert) => insert,
        Err(relay_core::CoreError::Duplicate(_)) => {
            return error_response(state.environment, &RelayError::DuplicateIdempotencyKey);
        },
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let event = insert.event().clone();

    if insert.is_new() {
        let fanout = FanoutJob { event_id: event.id, event_type: event.event_type.clone() };
        // The event is durable either way; a lost fan-out is recovered by
        // the operator through the admin surface.
        if let Err(e) = state.queue.enqueue_fanout(&fanout).await {
            warn!(
                event_id = %event.id,
                error = %e,
                "event stored but fan-out enqueue failed"
            );
        }
        info!(event_id = %event.id, event_type = %event.event_type, "event accepted");
    } else {
        info!(event_id = %event.id, "duplicate idempotency key, returning prior event");
    }

    let response = IngestResponse {
        event_id: event.id,
        received_at: event.received_at,
        duplicate: !insert.is_new(),
        processing_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// `GET /api/v1/events/{id}`
#[instrument(name = "get_event", skip(state))]
pub async fn get_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let event_id = EventId::from(id);

    let event = match state.storage.events.find_by_id(event_id).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            return error_response(state.environment, &RelayError::EventNotFound { id: event_id });
        },
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let logs = match state.storage.delivery_logs.find_by_event(event_id).await {
        Ok(logs) => logs,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let response = event_detail(event, logs);

    (StatusCode::OK, Json(response)).into_response()
}

fn event_detail(event: Event, logs: Vec<DeliveryLog>) -> EventDetailResponse {
    EventDetailResponse {
        id: event.id,
        idempotency_key: event.idempotency_key,
        event_type: event.event_type,
        payload: event.payload.0,
        received_at: event.received_at,
        delivery_logs: logs.into_iter().map(Into::into).collect(),
    }
}

fn extract_idempotency_key(headers: &HeaderMap) -> Result<String, RelayError> {
    headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToString::to_string)
        .ok_or(RelayError::MissingIdempotencyKey)
}

fn parse_and_validate(body: &[u8]) -> Result<IngestRequest, RelayError> {
    let request: IngestRequest = serde_json::from_slice(body)
        .map_err(|e| RelayError::Validation { message: format!("malformed request body: {e}") })?;

    if !is_valid_event_type(&request.event_type) {
        return Err(RelayError::Validation {
            message: "eventType must be non-empty and match [A-Za-z0-9._-]+".to_string(),
        });
    }

    if !request.payload.is_object() {
        return Err(RelayError::Validation {
            message: "payload must be a JSON object".to_string(),
        });
    }

    let payload_size = serde_json::to_vec(&request.payload)
        .map_err(|e| RelayError::Validation { message: format!("unserializable payload: {e}") })?
        .len();

    if payload_size > MAX_PAYLOAD_BYTES {
        return Err(RelayError::Validation {
            message: format!(
                "payload is {payload_size} bytes, limit is {MAX_PAYLOAD_BYTES}"
            ),
        });
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(event_type: &str, payload: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "eventType": event_type,
            "payload": payload,
        }))
        .unwrap()
    }

    #[test]
    fn missing_idempotency_key_rejected() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_idempotency_key(&headers),
            Err(RelayError::MissingIdempotencyKey)
        ));
    }

    #[test]
    fn empty_idempotency_key_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-idempotency-key", "   ".parse().unwrap());
        assert!(matches!(
            extract_idempotency_key(&headers),
            Err(RelayError::MissingIdempotencyKey)
        ));
    }

    #[test]
    fn idempotency_key_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-idempotency-key", "k1".parse().unwrap());
        assert_eq!(extract_idempotency_key(&headers).unwrap(), "k1");
    }

    #[test]
    fn valid_request_parses() {
        let request = parse_and_validate(&body("user.created", serde_json::json!({"x": 1})));
        assert!(request.is_ok());
    }

    #[test]
    fn invalid_event_type_rejected() {
        for event_type in ["", "not valid", "slash/type"] {
            let result = parse_and_validate(&body(event_type, serde_json::json!({})));
            assert!(
                matches!(result, Err(RelayError::Validation { .. })),
                "{event_type:?} should be rejected"
            );
        }
    }

    #[test]
    fn non_object_payload_rejected() {
        let result = parse_and_validate(&body("user.created", serde_json::json!([1, 2])));
        assert!(matches!(result, Err(RelayError::Validation { .. })));

        let result = parse_and_validate(&body("user.created", serde_json::json!("str")));
        assert!(matches!(result, Err(RelayError::Validation { .. })));
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = "a".repeat(MAX_PAYLOAD_BYTES);
        let result = parse_and_validate(&body("user.created", serde_json::json!({"blob": big})));
        assert!(matches!(result, Err(RelayError::Validation { .. })));
    }

    #[test]
    fn payload_at_limit_accepted() {
        // {"blob":"aaa...a"} serializes to 10 framing bytes + the blob.
        let blob = "a".repeat(MAX_PAYLOAD_BYTES - 11);
        let result = parse_and_validate(&body("user.created", serde_json::json!({"blob": blob})));
        assert!(result.is_ok());
    }

    #[test]
    fn malformed_json_rejected() {
        let result = parse_and_validate(b"{not json");
        assert!(matches!(result, Err(RelayError::Validation { .. })));
    }
}
