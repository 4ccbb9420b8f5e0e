//! Durable job queue for the event relay.
//!
//! Backed by the same PostgreSQL instance as the store, with `FOR UPDATE
//! SKIP LOCKED` claiming for lock-free concurrent workers. Two topics:
//! `fanout` (one shot) and `delivery` (bounded retries with exponential
//! backoff). At-least-once dispatch: stalled jobs are re-dispatched after
//! the stall window.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, Result};
pub use job::{ClaimedJob, DeliveryJob, FanoutJob, Topic};
pub use queue::{FailOutcome, Queue, QueueConfig, QueueCounts};
