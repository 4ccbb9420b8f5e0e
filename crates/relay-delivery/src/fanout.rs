//! Fan-out processor: expands one accepted event into per-subscriber
//! delivery jobs.
//!
//! Enqueues run concurrently with a single join point. A failed enqueue
//! fails the whole job; redelivery may then enqueue some deliveries twice,
//! which is acceptable because the delivery worker re-reads store state and
//! subscribers dedupe on `X-Event-Id`.

use std::{sync::Arc, time::Duration};

use futures::future::try_join_all;
use relay_core::{storage::Storage, Clock};
use relay_queue::{ClaimedJob, DeliveryJob, FanoutJob, Queue, Topic};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Configuration for the fan-out processor loop.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Jobs claimed per poll.
    pub batch_size: usize,
    /// Idle poll interval when the topic is empty.
    pub poll_interval: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { batch_size: 10, poll_interval: Duration::from_secs(1) }
    }
}

/// Consumer of the `fanout` topic.
pub struct FanoutProcessor {
    storage: Arc<Storage>,
    queue: Arc<Queue>,
    config: FanoutConfig,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl FanoutProcessor {
    /// Creates a new fan-out processor.
    pub fn new(
        storage: Arc<Storage>,
        queue: Arc<Queue>,
        config: FanoutConfig,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, queue, config, cancellation_token, clock }
    }

    /// Main loop: claims and processes fan-out jobs until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns error under normal operation; per-job failures are
    /// reported to the queue and logged.
    pub async fn run(&self) -> Result<()> {
        info!("fan-out processor starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.queue.claim(Topic::Fanout, self.config.batch_size).await {
                Ok(jobs) if jobs.is_empty() => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(jobs) => {
                    for job in jobs {
                        if self.cancellation_token.is_cancelled() {
                            break;
                        }
                        self.handle_job(job).await;
                    }
                },
                Err(e) => {
                    error!(error = %e, "fan-out claim failed");
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("fan-out processor stopped");
        Ok(())
    }

    /// Processes one claimed fan-out job end to end, reporting the outcome
    /// to the queue.
    pub async fn handle_job(&self, job: ClaimedJob) {
        let job_id = job.id;

        match self.process(&job).await {
            Ok(enqueued) => {
                debug!(job_id = %job_id, delivery_jobs = enqueued, "fan-out complete");
                if let Err(e) = self.queue.complete(job_id).await {
                    warn!(job_id = %job_id, error = %e, "failed to complete fan-out job");
                }
            },
            Err(e) => {
                error!(job_id = %job_id, error = %e, "fan-out failed");
                if let Err(fail_err) = self.queue.fail(job_id, &e.to_string()).await {
                    warn!(job_id = %job_id, error = %fail_err, "failed to report fan-out failure");
                }
            },
        }
    }

    async fn process(&self, job: &ClaimedJob) -> Result<usize> {
        let fanout: FanoutJob = job.decode()?;

        let subscriptions = self.storage.subscriptions.list_active(&fanout.event_type).await?;

        if subscriptions.is_empty() {
            debug!(
                event_id = %fanout.event_id,
                event_type = %fanout.event_type,
                "no active subscribers"
            );
            return Ok(0);
        }

        let enqueues = subscriptions.iter().map(|subscription| {
            let delivery =
                DeliveryJob { event_id: fanout.event_id, subscription_id: subscription.id };
            let queue = self.queue.clone();
            async move { queue.enqueue_delivery(&delivery).await }
        });

        let ids = try_join_all(enqueues).await?;

        Ok(ids.len())
    }
}
