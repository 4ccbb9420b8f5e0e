//! Job shapes carried by the queue.
//!
//! Two topics exist: `fanout` expands one accepted event into per-subscriber
//! work, `delivery` performs one outbound POST. Payloads are opaque JSON to
//! the queue itself; workers decode them with [`ClaimedJob::decode`].

use std::fmt;

use relay_core::models::{EventId, SubscriptionId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Logical queue topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Expand one event into N delivery jobs.
    Fanout,
    /// One outbound delivery to one subscriber.
    Delivery,
}

impl Topic {
    /// Database representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fanout => "fanout",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a fan-out job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutJob {
    /// Event to fan out.
    pub event_id: EventId,
    /// Routing key used to resolve subscribers.
    pub event_type: String,
}

/// Payload of a delivery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Event to deliver.
    pub event_id: EventId,
    /// Subscriber to deliver to.
    pub subscription_id: SubscriptionId,
}

/// A job handed to a worker by [`Queue::claim`](crate::Queue::claim).
///
/// `attempt` is 1-based and already reflects this dispatch, so it is the
/// attempt number recorded in delivery logs.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Queue-assigned job identity.
    pub id: Uuid,
    /// Opaque payload as stored.
    pub payload: serde_json::Value,
    /// 1-based attempt number of this dispatch.
    pub attempt: i32,
    /// Attempts allowed in total, including the first.
    pub max_attempts: i32,
}

impl ClaimedJob {
    /// Decodes the payload into a typed job shape.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Serialization` when the stored payload does not
    /// match the expected shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| QueueError::Serialization(format!("malformed job payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_database_representation() {
        assert_eq!(Topic::Fanout.as_str(), "fanout");
        assert_eq!(Topic::Delivery.as_str(), "delivery");
    }

    #[test]
    fn claimed_job_decodes_typed_payloads() {
        let job = DeliveryJob { event_id: EventId::new(), subscription_id: SubscriptionId::new() };
        let claimed = ClaimedJob {
            id: Uuid::new_v4(),
            payload: serde_json::to_value(&job).unwrap(),
            attempt: 1,
            max_attempts: 3,
        };

        let decoded: DeliveryJob = claimed.decode().unwrap();
        assert_eq!(decoded.event_id, job.event_id);
        assert_eq!(decoded.subscription_id, job.subscription_id);
    }

    #[test]
    fn claimed_job_rejects_mismatched_payload() {
        let claimed = ClaimedJob {
            id: Uuid::new_v4(),
            payload: serde_json::json!({"unexpected": true}),
            attempt: 1,
            max_attempts: 1,
        };

        assert!(claimed.decode::<FanoutJob>().is_err());
    }
}
