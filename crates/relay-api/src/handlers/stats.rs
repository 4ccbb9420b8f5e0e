//! Aggregate statistics for the operator dashboard.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::instrument;

use super::error_response;
use crate::AppState;

/// Aggregate counters across the relay.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Event totals.
    pub events: EventStats,
    /// Subscription totals.
    pub subscriptions: SubscriptionStats,
    /// Delivery attempt totals.
    pub deliveries: DeliveryStats,
}

/// Event counters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    /// All stored events.
    pub total: i64,
}

/// Subscription counters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    /// All subscriptions.
    pub total: i64,
    /// Currently active.
    pub active: i64,
    /// Currently inactive.
    pub inactive: i64,
}

/// Delivery attempt counters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    /// All attempts.
    pub total: i64,
    /// Attempts that got a 2xx.
    pub success: i64,
    /// Attempts that failed.
    pub failed: i64,
    /// Attempts still in flight.
    pub pending: i64,
    /// `success / total * 100`, 0 when there are no attempts.
    pub success_rate: f64,
}

/// `GET /api/v1/admin/stats`
#[instrument(name = "get_stats", skip(state))]
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let events_total = match state.storage.events.count().await {
        Ok(count) => count,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let subscriptions_total = match state.storage.subscriptions.count().await {
        Ok(count) => count,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let subscriptions_active = match state.storage.subscriptions.count_active().await {
        Ok(count) => count,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let deliveries = match state.storage.delivery_logs.counts().await {
        Ok(counts) => counts,
        Err(e) => return error_response(state.environment, &e.into()),
    };

    let success_rate = if deliveries.total == 0 {
        0.0
    } else {
        deliveries.success as f64 / deliveries.total as f64 * 100.0
    };

    let response = StatsResponse {
        events: EventStats { total: events_total },
        subscriptions: SubscriptionStats {
            total: subscriptions_total,
            active: subscriptions_active,
            inactive: subscriptions_total - subscriptions_active,
        },
        deliveries: DeliveryStats {
            total: deliveries.total,
            success: deliveries.success,
            failed: deliveries.failed,
            pending: deliveries.pending,
            success_rate,
        },
    };

    (StatusCode::OK, Json(response)).into_response()
}
