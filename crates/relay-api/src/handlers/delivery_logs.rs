//! Admin delivery-log queries and the manual retry path.
//!
//! Retry never touches the old rows: it enqueues a fresh delivery job whose
//! attempts start again at 1 under the queue's normal policy.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use relay_core::{
    models::{DeliveryLogId, DeliveryStatus, EventId, SubscriptionId},
    storage::delivery_logs::DeliveryLogFilter,
    RelayError,
};
use relay_queue::DeliveryJob;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{error_response, ingest::DeliveryLogResponse};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Query parameters for listing delivery logs.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, capped at 100.
    pub limit: Option<i64>,
    /// Restrict to one event.
    pub event_id: Option<Uuid>,
    /// Restrict to one subscription.
    pub subscription_id: Option<Uuid>,
    /// Restrict by status: `pending`, `success`, or `failed`.
    pub status: Option<String>,
    /// Restrict by the event's type.
    pub event_type: Option<String>,
    /// Attempts at or after this instant (RFC 3339).
    pub start_date: Option<DateTime<Utc>>,
    /// Attempts at or before this instant (RFC 3339).
    pub end_date: Option<DateTime<Utc>>,
}

/// Paginated list envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogListResponse {
    /// Page of attempts, newest first.
    pub delivery_logs: Vec<DeliveryLogResponse>,
    /// Total rows matching the filter.
    pub total: i64,
    /// Page returned.
    pub page: i64,
    /// Page size used.
    pub limit: i64,
}

/// Response to a manual retry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    /// Always true on 200.
    pub retried: bool,
    /// Event re-enqueued.
    pub event_id: EventId,
    /// Subscription targeted.
    pub subscription_id: SubscriptionId,
}

/// `GET /api/v1/admin/delivery-logs`
#[instrument(name = "list_delivery_logs", skip(state))]
pub async fn list_delivery_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let status = match query.status.as_deref().map(str::parse::<DeliveryStatus>).transpose() {
        Ok(status) => status,
        Err(e) => {
            return error_response(state.environment, &RelayError::Validation { message: e });
        },
    };

    let filter = DeliveryLogFilter {
        event_id: query.event_id.map(EventId::from),
        subscription_id: query.subscription_id.map(SubscriptionId::from),
        status,
        event_type: query.event_type,
        start_date: query.start_date,
        end_date: query.end_date,
    };

    match state.storage.delivery_logs.list(&filter, page, limit).await {
        Ok((logs, total)) => {
            let response = DeliveryLogListResponse {
                delivery_logs: logs.into_iter().map(Into::into).collect(),
                total,
                page,
                limit,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => error_response(state.environment, &e.into()),
    }
}

/// `POST /api/v1/admin/delivery-logs/{id}/retry`
#[instrument(name = "retry_delivery", skip(state))]
pub async fn retry_delivery(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let log_id = DeliveryLogId::from(id);

    let log = match state.storage.delivery_logs.find_by_id(log_id).await {
        Ok(Some(log)) => log,
        Ok(None) => {
            return error_response(state.environment, &RelayError::LogNotFound { id: log_id });
        },
        Err(e) => return error_response(state.environment, &e.into()),
    };

    if log.status == DeliveryStatus::Success {
        return error_response(state.environment, &RelayError::InvalidRetry);
    }

    // Unlike the automatic worker path, a retry against a departed
    // subscriber is rejected loudly rather than silently dropped.
    let subscription = match state.storage.subscriptions.find_by_id(log.subscription_id).await {
        Ok(subscription) => subscription,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    match subscription {
        Some(subscription) if subscription.is_active => {},
        _ => return error_response(state.environment, &RelayError::InactiveSubscription),
    }

    let job = DeliveryJob { event_id: log.event_id, subscription_id: log.subscription_id };

    match state.queue.enqueue_delivery(&job).await {
        Ok(job_id) => {
            info!(
                log_id = %log_id,
                event_id = %log.event_id,
                subscription_id = %log.subscription_id,
                job_id = %job_id,
                "manual retry enqueued"
            );
            let response = RetryResponse {
                retried: true,
                event_id: log.event_id,
                subscription_id: log.subscription_id,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => error_response(state.environment, &RelayError::Internal(anyhow::anyhow!(e))),
    }
}
