//! Repository for subscription configuration.
//!
//! The partial unique index on `(event_type, target_url) WHERE is_active`
//! enforces the single-active-pair rule at insert and update time; this
//! repository surfaces those violations as `CoreError::Duplicate`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{Subscription, SubscriptionId},
};

/// Input for creating a subscription. The secret is generated by the caller
/// and stored verbatim.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Event type the subscriber wants.
    pub event_type: String,
    /// Delivery target, already validated as an absolute http/https URL.
    pub target_url: String,
    /// Server-generated signing secret.
    pub secret_key: String,
}

/// Partial update of a subscription. `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    /// New event type, if changing.
    pub event_type: Option<String>,
    /// New target URL, if changing.
    pub target_url: Option<String>,
    /// New activity flag, if changing.
    pub is_active: Option<bool>,
}

/// Filters for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict by activity flag.
    pub is_active: Option<bool>,
}

/// Repository for subscription database operations.
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

    /// Creates a new active subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Duplicate` when an active subscription for the
    /// same (event type, target URL) pair already exists.
    pub async fn create(&self, new: &NewSubscription) -> Result<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r"
            INSERT INTO subscriptions (
                id, event_type, target_url, secret_key, is_active, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, TRUE, NOW(), NOW())
            RETURNING id, event_type, target_url, secret_key, is_active, created_at, updated_at
            ",
        )
        .bind(SubscriptionId::new())
        .bind(&new.event_type)
        .bind(&new.target_url)
        .bind(&new.secret_key)
        .fetch_one(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, event_type, target_url, secret_key, is_active, created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            ",
        )
        .bind(subscription_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Lists active subscriptions for an event type.
    ///
    /// This is the fan-out resolution query.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_active(&self, event_type: &str) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, event_type, target_url, secret_key, is_active, created_at, updated_at
            FROM subscriptions
            WHERE event_type = $1 AND is_active
            ORDER BY created_at ASC
            ",
        )
        .bind(event_type)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Lists subscriptions with optional filters and pagination.
    ///
    /// Returns the page plus the total count matching the filter.
    ///
    /// # Errors
    ///
    /// Returns error if either query fails.
    pub async fn list(
        &self,
        filter: &SubscriptionFilter,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Subscription>, i64)> {
        let offset = (page.max(1) - 1) * limit;

        let subscriptions = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, event_type, target_url, secret_key, is_active, created_at, updated_at
            FROM subscriptions
            WHERE ($1::TEXT IS NULL OR event_type = $1)
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(&filter.event_type)
        .bind(filter.is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM subscriptions
            WHERE ($1::TEXT IS NULL OR event_type = $1)
              AND ($2::BOOLEAN IS NULL OR is_active = $2)
            ",
        )
        .bind(&filter.event_type)
        .bind(filter.is_active)
        .fetch_one(&*self.pool)
        .await?;

        Ok((subscriptions, total.0))
    }

    /// Applies a partial update to a subscription.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown ID and
    /// `CoreError::Duplicate` when the update would violate the
    /// single-active-pair rule.
    pub async fn update(
        &self,
        subscription_id: SubscriptionId,
        patch: &SubscriptionPatch,
    ) -> Result<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r"
            UPDATE subscriptions
            SET event_type = COALESCE($2, event_type),
                target_url = COALESCE($3, target_url),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, event_type, target_url, secret_key, is_active, created_at, updated_at
            ",
        )
        .bind(subscription_id)
        .bind(&patch.event_type)
        .bind(&patch.target_url)
        .bind(patch.is_active)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("subscription {subscription_id}")))?;

        Ok(subscription)
    }

    /// Hard-deletes a subscription.
    ///
    /// Delivery logs keep their target URL snapshot, so the audit trail
    /// survives.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, subscription_id: SubscriptionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts all subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions").fetch_one(&*self.pool).await?;

        Ok(count.0)
    }

    /// Counts active subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_active(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE is_active")
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }
}
