//! HTTP request handlers for the relay API.
//!
//! Handlers follow a consistent pattern: validate, call the store or queue,
//! and answer with camelCase JSON. Errors carry stable codes; internal
//! details are suppressed in production.

pub mod delivery_logs;
pub mod health;
pub mod ingest;
pub mod stats;
pub mod subscriptions;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::RelayError;
use serde::Serialize;

use crate::Environment;

pub use delivery_logs::{list_delivery_logs, retry_delivery};
pub use health::health_check;
pub use ingest::{get_event, ingest_event};
pub use stats::get_stats;
pub use subscriptions::{
    create_subscription, delete_subscription, list_subscriptions, update_subscription,
};

/// Error response envelope with a stable code.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable code from the error taxonomy.
    pub code: String,
    /// Description; internal details suppressed in production.
    pub message: String,
}

/// Renders a `RelayError` as its wire representation.
pub(crate) fn error_response(environment: Environment, error: &RelayError) -> Response {
    let status = StatusCode::from_u16(error.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let message = match error {
        RelayError::Internal(inner) => {
            tracing::error!(error = %inner, "request failed with internal error");
            if environment.is_production() {
                "internal server error".to_string()
            } else {
                inner.to_string()
            }
        },
        other => other.to_string(),
    };

    let body = ErrorResponse {
        error: ErrorDetail { code: error.code().to_string(), message },
    };

    (status, Json(body)).into_response()
}
