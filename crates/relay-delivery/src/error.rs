//! Error types for fan-out and delivery operations.
//!
//! Transport failures carry the text that ends up in the delivery log's
//! `error_message`; fatal conditions mark the queue job permanently failed
//! instead of burning retries.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while processing fan-out and delivery jobs.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection, DNS, or TLS failure before a response arrived.
    #[error("network error: {message}")]
    Network {
        /// What the transport reported.
        message: String,
    },

    /// Per-attempt deadline exceeded.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured per-attempt timeout.
        timeout_ms: u64,
    },

    /// The referenced event no longer exists. Fatal: retrying cannot help.
    #[error("event {event_id} not found")]
    EventMissing {
        /// ID from the job payload.
        event_id: relay_core::models::EventId,
    },

    /// Store operation failed mid-attempt.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying store error text.
        message: String,
    },

    /// Queue operation failed mid-attempt.
    #[error("queue error: {0}")]
    Queue(#[from] relay_queue::QueueError),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// What failed to encode or decode.
        message: String,
    },

    /// Client misconfiguration, e.g. an unparseable target URL.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is misconfigured.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

impl From<relay_core::CoreError> for DeliveryError {
    fn from(err: relay_core::CoreError) -> Self {
        Self::Storage { message: err.to_string() }
    }
}
