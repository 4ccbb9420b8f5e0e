//! Error types and result handling for relay operations.
//!
//! Two layers: `CoreError` classifies storage-level failures, `RelayError`
//! carries the stable wire codes surfaced over HTTP. Delivery transport
//! failures never appear here; they are captured in delivery logs.

use thiserror::Error;

use crate::models::{DeliveryLogId, EventId, SubscriptionId};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Storage-level error classification.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violation.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Attempted transition out of a terminal delivery-log state.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    /// Invalid input rejected before touching the database.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::InvalidInput(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Relay error carrying the stable wire codes from the HTTP contract.
#[derive(Debug, Error)]
pub enum RelayError {
    /// `X-Idempotency-Key` header missing or empty.
    #[error("missing or empty X-Idempotency-Key header")]
    MissingIdempotencyKey,

    /// Request body failed validation.
    #[error("validation failed: {message}")]
    Validation {
        /// What was rejected and why.
        message: String,
    },

    /// Target URL is not an absolute http/https URL.
    #[error("invalid target URL: {message}")]
    InvalidUrl {
        /// Why the URL was rejected.
        message: String,
    },

    /// Idempotency key conflicted but the winning row is not visible yet.
    /// Only reachable when the race partner has not committed.
    #[error("idempotency key conflicted with a concurrent insert")]
    DuplicateIdempotencyKey,

    /// An active subscription for this (event type, target URL) already
    /// exists.
    #[error("an active subscription for this event type and target URL already exists")]
    DuplicateSubscription,

    /// Event does not exist.
    #[error("event {id} not found")]
    EventNotFound {
        /// The missing event.
        id: EventId,
    },

    /// Subscription does not exist.
    #[error("subscription {id} not found")]
    SubscriptionNotFound {
        /// The missing subscription.
        id: SubscriptionId,
    },

    /// Delivery log does not exist.
    #[error("delivery log {id} not found")]
    LogNotFound {
        /// The missing log row.
        id: DeliveryLogId,
    },

    /// Manual retry of a successful delivery.
    #[error("cannot retry a successful delivery")]
    InvalidRetry,

    /// Manual retry against an inactive or deleted subscription.
    #[error("subscription is inactive or deleted")]
    InactiveSubscription,

    /// Store or queue failure inside a request handler.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Returns the stable error code sent on the wire.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidUrl { .. } => "INVALID_URL",
            Self::DuplicateIdempotencyKey => "DUPLICATE_IDEMPOTENCY_KEY",
            Self::DuplicateSubscription => "DUPLICATE_SUBSCRIPTION",
            Self::EventNotFound { .. } => "EVENT_NOT_FOUND",
            Self::SubscriptionNotFound { .. } => "SUBSCRIPTION_NOT_FOUND",
            Self::LogNotFound { .. } => "LOG_NOT_FOUND",
            Self::InvalidRetry => "INVALID_RETRY",
            Self::InactiveSubscription => "INACTIVE_SUBSCRIPTION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status associated with this error.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MissingIdempotencyKey
            | Self::Validation { .. }
            | Self::InvalidUrl { .. }
            | Self::InvalidRetry
            | Self::InactiveSubscription => 400,
            Self::EventNotFound { .. }
            | Self::SubscriptionNotFound { .. }
            | Self::LogNotFound { .. } => 404,
            Self::DuplicateIdempotencyKey | Self::DuplicateSubscription => 409,
            Self::Internal(_) => 500,
        }
    }
}

impl From<CoreError> for RelayError {
    fn from(err: CoreError) -> Self {
        Self::Internal(anyhow::anyhow!(err))
    }
}
