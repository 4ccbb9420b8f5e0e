//! HTTP client for outbound webhook delivery.
//!
//! Builds the signed request, enforces the per-attempt timeout, and reduces
//! the response to what the delivery log records. A non-2xx response is a
//! normal `Ok` here; only transport-level failures are errors.

use std::time::Duration;

use bytes::Bytes;
use relay_core::models::EventId;
use tracing::{debug, info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Response bytes kept for the audit trail.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1000;

/// Configuration for the delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// User agent sent to subscribers.
    pub user_agent: String,
    /// Redirects followed before giving up.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "webhook-relay/1.0".to_string(),
            max_redirects: 3,
        }
    }
}

/// One outbound delivery attempt, fully assembled by the worker.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination URL from the subscription.
    pub url: String,
    /// Canonical envelope bytes; the signature covers exactly these.
    pub body: Bytes,
    /// `X-Signature` header value.
    pub signature: String,
    /// `X-Timestamp` header value, Unix seconds.
    pub timestamp: i64,
    /// Event being delivered, for the `X-Event-Id` header.
    pub event_id: EventId,
    /// Event type, for the `X-Event-Type` header.
    pub event_type: String,
    /// Attempt number, for tracing only.
    pub attempt: i32,
}

/// What came back from the subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Body truncated to [`MAX_RESPONSE_BODY_BYTES`].
    pub body: String,
    /// True for status in [200, 299].
    pub is_success: bool,
    /// Wall time of the round trip.
    pub duration: Duration,
}

/// HTTP client for webhook delivery with connection pooling.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the underlying client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// POSTs one signed delivery to a subscriber.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or `Network` for transport-level failures. Non-2xx
    /// responses come back as `Ok` with `is_success = false`; classification
    /// is the worker's job.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let span = info_span!(
            "webhook_delivery",
            event_id = %request.event_id,
            url = %request.url,
            attempt = request.attempt,
        );

        async move {
            let start = std::time::Instant::now();

            let response = self
                .client
                .post(&request.url)
                .header("Content-Type", "application/json")
                .header("X-Signature", &request.signature)
                .header("X-Timestamp", request.timestamp.to_string())
                .header("X-Event-Type", &request.event_type)
                .header("X-Event-Id", request.event_id.to_string())
                .body(request.body.clone())
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        DeliveryError::timeout(self.config.timeout.as_millis() as u64)
                    } else if e.is_connect() {
                        DeliveryError::network(format!("connection failed: {e}"))
                    } else {
                        DeliveryError::network(e.to_string())
                    }
                })?;

            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();
            let body = read_truncated_body(response).await;
            let duration = start.elapsed();

            debug!(status = status_code, duration_ms = duration.as_millis(), "subscriber answered");

            Ok(DeliveryResponse { status_code, body, is_success, duration })
        }
        .instrument(span)
        .await
    }
}

/// Reads the response body, keeping at most [`MAX_RESPONSE_BODY_BYTES`]
/// bytes on a UTF-8 boundary.
async fn read_truncated_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => truncate_body(&bytes),
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_RESPONSE_BODY_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let mut cut = MAX_RESPONSE_BODY_BYTES;
    while cut > 0 && !bytes.is_char_boundary_at(cut) {
        cut -= 1;
    }
    String::from_utf8_lossy(&bytes[..cut]).into_owned()
}

/// Helper trait: `is_char_boundary` for byte slices treated as lossy UTF-8.
trait CharBoundary {
    fn is_char_boundary_at(&self, index: usize) -> bool;
}

impl CharBoundary for [u8] {
    fn is_char_boundary_at(&self, index: usize) -> bool {
        if index >= self.len() {
            return true;
        }
        // A byte is a boundary unless it is a UTF-8 continuation byte.
        (self[index] as i8) >= -0x40
    }
}
