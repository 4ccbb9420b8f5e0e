//! Repository for immutable event records.
//!
//! Ingestion idempotency is decided here: the unique index on
//! `idempotency_key` serializes concurrent inserts, and the loser of a race
//! observes the winner's row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Event, EventId},
};

/// Outcome of an idempotent event insert.
#[derive(Debug, Clone)]
pub enum EventInsert {
    /// The key was unseen; a new row was created and fan-out should be
    /// enqueued.
    Inserted(Event),

    /// The key already named an event; the existing row is returned and no
    /// fan-out happens.
    Duplicate(Event),
}

impl EventInsert {
    /// The stored event, regardless of which side of the race we were on.
    pub fn event(&self) -> &Event {
        match self {
            Self::Inserted(event) | Self::Duplicate(event) => event,
        }
    }

    /// True when this call created the row.
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Repository for event database operations.
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

    /// Inserts an event or reports the existing one for its idempotency key.
    ///
    /// `ON CONFLICT DO NOTHING` makes the insert atomic under concurrent
    /// requests with the same key; exactly one caller sees `Inserted`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert or the duplicate lookup fails.
    pub async fn create(
        &self,
        idempotency_key: &str,
        event_type: &str,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<EventInsert> {
        let inserted = sqlx::query_as::<_, Event>(
            r"
            INSERT INTO events (id, idempotency_key, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id, idempotency_key, event_type, payload, received_at
            ",
        )
        .bind(EventId::new())
        .bind(idempotency_key)
        .bind(event_type)
        .bind(sqlx::types::Json(payload))
        .bind(received_at)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(event) = inserted {
            return Ok(EventInsert::Inserted(event));
        }

        // Lost the race or a genuine replay: the winner's row should exist.
        // If the partner has not committed yet the key is taken but the row
        // is invisible; callers surface that as a duplicate-key conflict.
        let existing = self.find_by_idempotency_key(idempotency_key).await?.ok_or_else(|| {
            CoreError::Duplicate(format!(
                "idempotency key {idempotency_key} raced with a concurrent insert"
            ))
        })?;

        Ok(EventInsert::Duplicate(existing))
    }

    /// Finds an event by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, event_id: EventId) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            r"
            SELECT id, idempotency_key, event_type, payload, received_at
            FROM events
            WHERE id = $1
            ",
        )
        .bind(event_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Finds an event by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            r"
            SELECT id, idempotency_key, event_type, payload, received_at
            FROM events
            WHERE idempotency_key = $1
            ",
        )
        .bind(idempotency_key)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(event)
    }

    /// Counts all stored events.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM events").fetch_one(&*self.pool).await?;

        Ok(count.0)
    }
}
