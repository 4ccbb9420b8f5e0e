//! Core domain models and strongly-typed identifiers.
//!
//! Defines events, subscriptions, delivery logs, and newtype ID wrappers for
//! compile-time type safety. Includes database serialization traits and the
//! delivery-log state machine used by the relay pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Events are immutable
/// once created, and this ID follows them through the entire relay pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery log identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryLogId(pub Uuid);

impl DeliveryLogId {
    /// Creates a new random delivery log ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryLogId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for DeliveryLogId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryLogId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryLogId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Immutable record of an event a producer handed to the relay.
///
/// An event is created exactly once per idempotency key and never mutated
/// afterwards. Retention is operator policy, not enforced here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    /// Unique identifier, server-generated at acceptance.
    pub id: EventId,

    /// Producer-supplied key naming this event. Globally unique.
    pub idempotency_key: String,

    /// Event type routing key, `^[A-Za-z0-9._-]+$`.
    pub event_type: String,

    /// Arbitrary JSON document, at most 1 MiB serialized.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// Server clock at acceptance.
    pub received_at: DateTime<Utc>,
}

/// Interest declaration binding an event type to a target URL.
///
/// At most one active subscription exists per (`event_type`, `target_url`)
/// pair, enforced by a partial unique index. The `secret_key` is generated
/// server-side and returned exactly once on create; rotation is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Event type this subscriber wants to receive.
    pub event_type: String,

    /// Absolute http/https URL deliveries are POSTed to.
    pub target_url: String,

    /// HMAC signing secret, 32 random bytes hex-encoded.
    pub secret_key: String,

    /// Inactive subscriptions are skipped by the delivery worker.
    pub is_active: bool,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When this subscription was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Delivery attempt outcome.
///
/// Each attempt starts `pending` and transitions exactly once:
///
/// ```text
/// [pending] ── 2xx response ──► [success]  (terminal)
///     │
///     └── non-2xx / transport ► [failed]   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Row created immediately before the HTTP call.
    Pending,

    /// Endpoint answered with a status in [200, 299].
    Success,

    /// Non-2xx response or transport-level error.
    Failed,
}

impl DeliveryStatus {
    /// True for `success` and `failed`; terminal rows are never mutated.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Audit record of one delivery attempt against one (event, subscription)
/// pair.
///
/// Rows are append-only. Retries produce new rows with a higher
/// `attempt_count`; terminal rows are never overwritten. The row carries a
/// snapshot of the target URL so the audit trail survives subscription
/// deletion.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLog {
    /// Unique identifier for this attempt.
    pub id: DeliveryLogId,

    /// Event being delivered.
    pub event_id: EventId,

    /// Subscription this attempt was made for. No foreign key: logs outlive
    /// hard-deleted subscriptions.
    pub subscription_id: SubscriptionId,

    /// Target URL at the time of the attempt.
    pub target_url: String,

    /// Current state of this attempt.
    pub status: DeliveryStatus,

    /// Sequential attempt number within one queue job, 1-based.
    pub attempt_count: i32,

    /// When this attempt started.
    pub attempted_at: DateTime<Utc>,

    /// HTTP status code, absent when the request never completed.
    pub response_status_code: Option<i32>,

    /// Response body truncated to 1000 bytes.
    pub response_body: Option<String>,

    /// Transport error text or `HTTP <code>` for non-2xx responses.
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_display_matches_database_format() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Success.to_string(), "success");
        assert_eq!(DeliveryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn delivery_status_parses_from_database_format() {
        assert_eq!("pending".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Pending);
        assert_eq!("success".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Success);
        assert_eq!("failed".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Failed);
        assert!("delivered".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn terminal_states_identified() {
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }
}
