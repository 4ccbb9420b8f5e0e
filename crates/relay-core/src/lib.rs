//! Core domain models, error taxonomy, and persistence for the event relay.
//!
//! Provides strongly-typed domain primitives, the stable wire-error codes,
//! and the repository layer every other crate builds on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;
pub mod validate;

pub use error::{CoreError, RelayError, Result};
pub use models::{
    DeliveryLog, DeliveryLogId, DeliveryStatus, Event, EventId, Subscription, SubscriptionId,
};
pub use time::{Clock, RealClock};
