//! HTTP API server for the event relay.
//!
//! Provides the producer-facing ingestion endpoint, the operator admin
//! surface, and the health probe, with request logging middleware and
//! structured error responses carrying stable codes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

use std::{sync::Arc, time::Instant};

use relay_core::{storage::Storage, Clock};
use relay_queue::Queue;

pub use config::{Config, Environment};
pub use server::create_router;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Repository container.
    pub storage: Arc<Storage>,
    /// Durable job queue.
    pub queue: Arc<Queue>,
    /// Clock for receipt timestamps.
    pub clock: Arc<dyn Clock>,
    /// Deployment environment controlling error verbosity.
    pub environment: Environment,
    /// Process start, for the health probe's uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Creates application state; `started_at` is captured now.
    pub fn new(
        storage: Arc<Storage>,
        queue: Arc<Queue>,
        clock: Arc<dyn Clock>,
        environment: Environment,
    ) -> Self {
        Self { storage, queue, clock, environment, started_at: Instant::now() }
    }
}
