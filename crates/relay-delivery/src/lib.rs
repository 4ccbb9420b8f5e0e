//! Fan-out and signed webhook delivery for the event relay.
//!
//! Consumes the two queue topics: the fan-out processor expands accepted
//! events into per-subscriber delivery jobs, and the delivery workers
//! execute signed POSTs with per-attempt audit rows. Retry pacing lives in
//! the queue; this crate classifies outcomes and reports them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod envelope;
pub mod error;
pub mod fanout;
pub mod signer;
pub mod worker;
pub mod worker_pool;

pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use envelope::envelope_body;
pub use error::{DeliveryError, Result};
pub use fanout::{FanoutConfig, FanoutProcessor};
pub use worker::{DeliveryWorker, WorkerConfig, WorkerStats};
pub use worker_pool::WorkerPool;
