//! Database access layer implementing the repository pattern.
//!
//! Repositories translate between domain models and the PostgreSQL schema.
//! All persistence goes through this module; correctness under concurrent
//! writers relies on the schema's uniqueness constraints, not on in-memory
//! coordination.

use std::sync::Arc;

use sqlx::PgPool;

pub mod delivery_logs;
pub mod events;
pub mod schema;
pub mod subscriptions;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for immutable event records.
    pub events: Arc<events::Repository>,

    /// Repository for subscription configuration.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for the delivery audit trail.
    pub delivery_logs: Arc<delivery_logs::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            events: Arc::new(events::Repository::new(pool.clone())),
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            delivery_logs: Arc::new(delivery_logs::Repository::new(pool)),
        }
    }

    /// Performs a lightweight connectivity check.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.events.pool()).await?;

        Ok(())
    }
}
