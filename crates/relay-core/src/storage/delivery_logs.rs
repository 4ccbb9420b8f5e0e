//! Repository for the delivery audit trail.
//!
//! Rows are append-only: each attempt inserts a fresh `pending` row and
//! finishes it exactly once. The `WHERE status = 'pending'` guard on finish
//! is what keeps terminal rows immutable under concurrent workers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{DeliveryLog, DeliveryLogId, DeliveryStatus, EventId, SubscriptionId},
};

/// Filters for listing delivery logs.
#[derive(Debug, Clone, Default)]
pub struct DeliveryLogFilter {
    /// Restrict to one event.
    pub event_id: Option<EventId>,
    /// Restrict to one subscription.
    pub subscription_id: Option<SubscriptionId>,
    /// Restrict by attempt status.
    pub status: Option<DeliveryStatus>,
    /// Restrict by the event's type (joined through `events`).
    pub event_type: Option<String>,
    /// Attempts at or after this instant.
    pub start_date: Option<DateTime<Utc>>,
    /// Attempts at or before this instant.
    pub end_date: Option<DateTime<Utc>>,
}

/// Counts of delivery logs grouped by status.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryCounts {
    /// All rows.
    pub total: i64,
    /// Rows in `success`.
    pub success: i64,
    /// Rows in `failed`.
    pub failed: i64,
    /// Rows still `pending`.
    pub pending: i64,
}

/// Repository for delivery log database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a fresh `pending` row for one delivery attempt.
    ///
    /// Never upserts: a retried attempt gets its own row with its own
    /// `attempt_count`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_pending(
        &self,
        event_id: EventId,
        subscription_id: SubscriptionId,
        target_url: &str,
        attempt_count: i32,
    ) -> Result<DeliveryLogId> {
        let id: DeliveryLogId = sqlx::query_scalar(
            r"
            INSERT INTO delivery_logs (
                id, event_id, subscription_id, target_url, status, attempt_count, attempted_at
            ) VALUES ($1, $2, $3, $4, 'pending', $5, NOW())
            RETURNING id
            ",
        )
        .bind(DeliveryLogId::new())
        .bind(event_id)
        .bind(subscription_id)
        .bind(target_url)
        .bind(attempt_count)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Transitions a `pending` row to its terminal state.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when called with `Pending`, and
    /// `CoreError::IllegalTransition` when the row is missing or already
    /// terminal.
    pub async fn finish(
        &self,
        log_id: DeliveryLogId,
        status: DeliveryStatus,
        response_status_code: Option<i32>,
        response_body: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(CoreError::InvalidInput(
                "delivery log can only be finished into a terminal state".to_string(),
            ));
        }

        let result = sqlx::query(
            r"
            UPDATE delivery_logs
            SET status = $2,
                response_status_code = $3,
                response_body = $4,
                error_message = $5
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(log_id)
        .bind(status)
        .bind(response_status_code)
        .bind(response_body)
        .bind(error_message)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::IllegalTransition(format!(
                "delivery log {log_id} is not pending"
            )));
        }

        Ok(())
    }

    /// Finds a delivery log by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, log_id: DeliveryLogId) -> Result<Option<DeliveryLog>> {
        let log = sqlx::query_as::<_, DeliveryLog>(
            r"
            SELECT id, event_id, subscription_id, target_url, status, attempt_count,
                   attempted_at, response_status_code, response_body, error_message
            FROM delivery_logs
            WHERE id = $1
            ",
        )
        .bind(log_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(log)
    }

    /// All attempts for an event, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_event(&self, event_id: EventId) -> Result<Vec<DeliveryLog>> {
        let logs = sqlx::query_as::<_, DeliveryLog>(
            r"
            SELECT id, event_id, subscription_id, target_url, status, attempt_count,
                   attempted_at, response_status_code, response_body, error_message
            FROM delivery_logs
            WHERE event_id = $1
            ORDER BY attempted_at DESC
            ",
        )
        .bind(event_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(logs)
    }

    /// Lists delivery logs with filters and pagination, newest first.
    ///
    /// Returns the page plus the total count matching the filter.
    ///
    /// # Errors
    ///
    /// Returns error if either query fails.
    pub async fn list(
        &self,
        filter: &DeliveryLogFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<DeliveryLog>, i64)> {
        let offset = (page.max(1) - 1) * limit;
        let status = filter.status.map(|s| s.to_string());

        let logs = sqlx::query_as::<_, DeliveryLog>(
            r"
            SELECT d.id, d.event_id, d.subscription_id, d.target_url, d.status,
                   d.attempt_count, d.attempted_at, d.response_status_code,
                   d.response_body, d.error_message
            FROM delivery_logs d
            JOIN events e ON e.id = d.event_id
            WHERE ($1::UUID IS NULL OR d.event_id = $1)
              AND ($2::UUID IS NULL OR d.subscription_id = $2)
              AND ($3::TEXT IS NULL OR d.status = $3)
              AND ($4::TEXT IS NULL OR e.event_type = $4)
              AND ($5::TIMESTAMPTZ IS NULL OR d.attempted_at >= $5)
              AND ($6::TIMESTAMPTZ IS NULL OR d.attempted_at <= $6)
            ORDER BY d.attempted_at DESC
            LIMIT $7 OFFSET $8
            ",
        )
        .bind(filter.event_id)
        .bind(filter.subscription_id)
        .bind(&status)
        .bind(&filter.event_type)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM delivery_logs d
            JOIN events e ON e.id = d.event_id
            WHERE ($1::UUID IS NULL OR d.event_id = $1)
              AND ($2::UUID IS NULL OR d.subscription_id = $2)
              AND ($3::TEXT IS NULL OR d.status = $3)
              AND ($4::TEXT IS NULL OR e.event_type = $4)
              AND ($5::TIMESTAMPTZ IS NULL OR d.attempted_at >= $5)
              AND ($6::TIMESTAMPTZ IS NULL OR d.attempted_at <= $6)
            ",
        )
        .bind(filter.event_id)
        .bind(filter.subscription_id)
        .bind(&status)
        .bind(&filter.event_type)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&*self.pool)
        .await?;

        Ok((logs, total.0))
    }

    /// Counts rows by status for the stats endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn counts(&self) -> Result<DeliveryCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM delivery_logs GROUP BY status")
                .fetch_all(&*self.pool)
                .await?;

        let mut counts = DeliveryCounts::default();
        for (status, count) in rows {
            counts.total += count;
            match status.as_str() {
                "success" => counts.success = count,
                "failed" => counts.failed = count,
                "pending" => counts.pending = count,
                other => {
                    return Err(CoreError::Database(format!(
                        "unexpected delivery status in database: {other}"
                    )));
                },
            }
        }

        Ok(counts)
    }
}
