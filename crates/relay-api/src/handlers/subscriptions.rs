//! Admin subscription CRUD.
//!
//! Create is the only place the signing secret crosses the wire; every
//! other response omits it. The single-active-pair rule is enforced by the
//! store's partial unique index and surfaces here as 409.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_core::{
    models::{Subscription, SubscriptionId},
    storage::subscriptions::{NewSubscription, SubscriptionFilter, SubscriptionPatch},
    validate::{is_valid_event_type, validate_target_url},
    CoreError, RelayError,
};
use relay_delivery::signer;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::error_response;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Query parameters for listing subscriptions.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, capped at 100.
    pub limit: Option<i64>,
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict by activity flag.
    pub is_active: Option<bool>,
}

/// Request body for creating a subscription.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSubscriptionRequest {
    /// Event type to subscribe to.
    pub event_type: String,
    /// Absolute http/https delivery target.
    pub target_url: String,
}

/// Request body for patching a subscription.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateSubscriptionRequest {
    /// New event type.
    pub event_type: Option<String>,
    /// New target URL.
    pub target_url: Option<String>,
    /// Activate or deactivate.
    pub is_active: Option<bool>,
}

/// Wire form of a subscription, secret omitted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    /// Subscription ID.
    pub id: SubscriptionId,
    /// Subscribed event type.
    pub event_type: String,
    /// Delivery target.
    pub target_url: String,
    /// Whether deliveries are made.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            event_type: subscription.event_type,
            target_url: subscription.target_url,
            is_active: subscription.is_active,
            created_at: subscription.created_at,
            updated_at: subscription.updated_at,
        }
    }
}

/// Create response: the only message that ever carries the secret.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubscriptionResponse {
    /// The created subscription.
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
    /// Signing secret, shown exactly once.
    pub secret_key: String,
}

/// Paginated list envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListResponse {
    /// Page of subscriptions.
    pub subscriptions: Vec<SubscriptionResponse>,
    /// Total rows matching the filter.
    pub total: i64,
    /// Page returned.
    pub page: i64,
    /// Page size used.
    pub limit: i64,
}

/// `GET /api/v1/admin/subscriptions`
#[instrument(name = "list_subscriptions", skip(state))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let filter = SubscriptionFilter { event_type: query.event_type, is_active: query.is_active };

    match state.storage.subscriptions.list(&filter, page, limit).await {
        Ok((subscriptions, total)) => {
            let response = SubscriptionListResponse {
                subscriptions: subscriptions.into_iter().map(Into::into).collect(),
                total,
                page,
                limit,
            };
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => error_response(state.environment, &e.into()),
    }
}

/// `POST /api/v1/admin/subscriptions`
#[instrument(name = "create_subscription", skip(state, body))]
pub async fn create_subscription(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CreateSubscriptionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response(state.environment, &e),
    };

    if !is_valid_event_type(&request.event_type) {
        return error_response(state.environment, &RelayError::Validation {
            message: "eventType must be non-empty and match [A-Za-z0-9._-]+".to_string(),
        });
    }

    if let Err(e) = validate_target_url(&request.target_url) {
        return error_response(state.environment, &e);
    }

    let new = NewSubscription {
        event_type: request.event_type,
        target_url: request.target_url,
        secret_key: signer::generate_secret(),
    };

    match state.storage.subscriptions.create(&new).await {
        Ok(subscription) => {
            info!(
                subscription_id = %subscription.id,
                event_type = %subscription.event_type,
                "subscription created"
            );
            let response = CreatedSubscriptionResponse {
                secret_key: subscription.secret_key.clone(),
                subscription: subscription.into(),
            };
            (StatusCode::CREATED, Json(response)).into_response()
        },
        Err(CoreError::Duplicate(_)) => {
            error_response(state.environment, &RelayError::DuplicateSubscription)
        },
        Err(e) => error_response(state.environment, &e.into()),
    }
}

/// `PUT /api/v1/admin/subscriptions/{id}`
#[instrument(name = "update_subscription", skip(state, body))]
pub async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let subscription_id = SubscriptionId::from(id);

    let request: UpdateSubscriptionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response(state.environment, &e),
    };

    if let Some(event_type) = &request.event_type {
        if !is_valid_event_type(event_type) {
            return error_response(state.environment, &RelayError::Validation {
                message: "eventType must be non-empty and match [A-Za-z0-9._-]+".to_string(),
            });
        }
    }

    if let Some(target_url) = &request.target_url {
        if let Err(e) = validate_target_url(target_url) {
            return error_response(state.environment, &e);
        }
    }

    let patch = SubscriptionPatch {
        event_type: request.event_type,
        target_url: request.target_url,
        is_active: request.is_active,
    };

    match state.storage.subscriptions.update(subscription_id, &patch).await {
        Ok(subscription) => {
            info!(subscription_id = %subscription.id, "subscription updated");
            (StatusCode::OK, Json(SubscriptionResponse::from(subscription))).into_response()
        },
        Err(CoreError::NotFound(_)) => error_response(
            state.environment,
            &RelayError::SubscriptionNotFound { id: subscription_id },
        ),
        Err(CoreError::Duplicate(_)) => {
            error_response(state.environment, &RelayError::DuplicateSubscription)
        },
        Err(e) => error_response(state.environment, &e.into()),
    }
}

/// `DELETE /api/v1/admin/subscriptions/{id}`
#[instrument(name = "delete_subscription", skip(state))]
pub async fn delete_subscription(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let subscription_id = SubscriptionId::from(id);

    match state.storage.subscriptions.delete(subscription_id).await {
        Ok(true) => {
            info!(subscription_id = %subscription_id, "subscription deleted");
            (StatusCode::OK, Json(serde_json::json!({ "deleted": true }))).into_response()
        },
        Ok(false) => error_response(
            state.environment,
            &RelayError::SubscriptionNotFound { id: subscription_id },
        ),
        Err(e) => error_response(state.environment, &e.into()),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, RelayError> {
    serde_json::from_slice(body)
        .map_err(|e| RelayError::Validation { message: format!("malformed request body: {e}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_parses_camel_case() {
        let request: CreateSubscriptionRequest = parse_body(
            br#"{"eventType": "user.created", "targetUrl": "https://example.com/hook"}"#,
        )
        .unwrap();

        assert_eq!(request.event_type, "user.created");
        assert_eq!(request.target_url, "https://example.com/hook");
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<CreateSubscriptionRequest, _> =
            parse_body(br#"{"eventType": "a", "targetUrl": "https://x.com", "secretKey": "mine"}"#);

        assert!(result.is_err());
    }

    #[test]
    fn update_request_allows_partial_bodies() {
        let request: UpdateSubscriptionRequest = parse_body(br#"{"isActive": false}"#).unwrap();

        assert_eq!(request.is_active, Some(false));
        assert!(request.event_type.is_none());
        assert!(request.target_url.is_none());
    }
}
