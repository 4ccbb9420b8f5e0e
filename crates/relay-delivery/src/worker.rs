//! Delivery worker: executes one signed POST per claimed delivery job.
//!
//! Every attempt writes its own audit row: `pending` immediately before the
//! HTTP call, then exactly one transition to `success` or `failed`. Retry
//! scheduling is the queue's job; the worker only reports the outcome.

use std::{sync::Arc, time::Duration};

use relay_core::{
    models::{DeliveryStatus, Event, Subscription},
    storage::Storage,
    Clock,
};
use relay_queue::{ClaimedJob, DeliveryJob, FailOutcome, Queue, Topic};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    envelope::envelope_body,
    error::{DeliveryError, Result},
    signer,
};

/// Configuration for the delivery worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent delivery workers.
    pub concurrency: usize,
    /// Jobs claimed per worker poll.
    pub batch_size: usize,
    /// Idle poll interval when the topic is empty.
    pub poll_interval: Duration,
    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters shared across the worker pool.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Delivery jobs processed since startup.
    pub jobs_processed: u64,
    /// Attempts that got a 2xx.
    pub successful_deliveries: u64,
    /// Attempts that failed and were handed back for retry.
    pub failed_deliveries: u64,
    /// Jobs that exhausted their retry budget.
    pub permanent_failures: u64,
    /// Jobs dropped because the subscription was gone or inactive.
    pub dropped_deliveries: u64,
}

/// A single delivery worker.
pub struct DeliveryWorker {
    id: usize,
    storage: Arc<Storage>,
    queue: Arc<Queue>,
    client: Arc<DeliveryClient>,
    config: WorkerConfig,
    stats: Arc<RwLock<WorkerStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        storage: Arc<Storage>,
        queue: Arc<Queue>,
        client: Arc<DeliveryClient>,
        config: WorkerConfig,
        stats: Arc<RwLock<WorkerStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, storage, queue, client, config, stats, cancellation_token, clock }
    }

    /// Main loop: claims and processes delivery jobs until cancelled.
    ///
    /// The current attempt always finishes and writes its terminal log row
    /// before the worker observes cancellation; anything unconfirmed is
    /// redelivered by the queue after its stall window.
    ///
    /// # Errors
    ///
    /// Never returns error under normal operation.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.queue.claim(Topic::Delivery, self.config.batch_size).await {
                Ok(jobs) if jobs.is_empty() => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(jobs) => {
                    for job in jobs {
                        self.handle_job(job).await;
                        if self.cancellation_token.is_cancelled() {
                            break;
                        }
                    }
                },
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "delivery claim failed");
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Processes one claimed delivery job end to end, reporting the outcome
    /// to the queue.
    pub async fn handle_job(&self, job: ClaimedJob) {
        let job_id = job.id;

        match self.attempt_delivery(&job).await {
            Ok(()) => {},
            Err(e) => {
                error!(worker_id = self.id, job_id = %job_id, error = %e, "attempt errored");
                let disposition = match e {
                    // Retries cannot resurrect a missing event.
                    DeliveryError::EventMissing { .. } | DeliveryError::Serialization { .. } => {
                        self.queue.fail_permanently(job_id, &e.to_string()).await
                    },
                    _ => self.queue.fail(job_id, &e.to_string()).await.map(|_| ()),
                };
                if let Err(fail_err) = disposition {
                    warn!(job_id = %job_id, error = %fail_err, "failed to report job failure");
                }
            },
        }
    }

    /// Executes a single delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error only for failures outside the normal
    /// attempt-classify-log path: missing event, malformed payload, store or
    /// queue trouble.
    async fn attempt_delivery(&self, job: &ClaimedJob) -> Result<()> {
        let delivery: DeliveryJob = job.decode().map_err(|e| DeliveryError::Serialization {
            message: format!("delivery job payload: {e}"),
        })?;

        let event = self
            .storage
            .events
            .find_by_id(delivery.event_id)
            .await?
            .ok_or(DeliveryError::EventMissing { event_id: delivery.event_id })?;

        // A subscriber that left, or was deactivated, is a deliberate
        // departure: complete the job without an audit row.
        let Some(subscription) = self.active_subscription(&delivery).await? else {
            debug!(
                worker_id = self.id,
                event_id = %delivery.event_id,
                subscription_id = %delivery.subscription_id,
                "subscription gone or inactive, dropping delivery"
            );
            self.queue.complete(job.id).await?;
            let mut stats = self.stats.write().await;
            stats.dropped_deliveries += 1;
            stats.jobs_processed += 1;
            return Ok(());
        };

        let log_id = self
            .storage
            .delivery_logs
            .create_pending(event.id, subscription.id, &subscription.target_url, job.attempt)
            .await?;

        let body = envelope_body(&event)?;
        let request = DeliveryRequest {
            url: subscription.target_url.clone(),
            signature: signer::sign(&subscription.secret_key, &body),
            timestamp: self.clock.now().timestamp(),
            event_id: event.id,
            event_type: event.event_type.clone(),
            attempt: job.attempt,
            body,
        };

        match self.client.deliver(request).await {
            Ok(response) if response.is_success => {
                self.storage
                    .delivery_logs
                    .finish(
                        log_id,
                        DeliveryStatus::Success,
                        Some(i32::from(response.status_code)),
                        Some(&response.body),
                        None,
                    )
                    .await?;
                self.queue.complete(job.id).await?;

                info!(
                    worker_id = self.id,
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    status = response.status_code,
                    attempt = job.attempt,
                    "webhook delivered"
                );

                let mut stats = self.stats.write().await;
                stats.jobs_processed += 1;
                stats.successful_deliveries += 1;
            },
            Ok(response) => {
                let error_message = format!("HTTP {}", response.status_code);
                self.storage
                    .delivery_logs
                    .finish(
                        log_id,
                        DeliveryStatus::Failed,
                        Some(i32::from(response.status_code)),
                        Some(&response.body),
                        Some(&error_message),
                    )
                    .await?;
                self.report_failure(job, &event, &subscription, &error_message).await?;
            },
            Err(e @ (DeliveryError::Network { .. } | DeliveryError::Timeout { .. })) => {
                let error_message = e.to_string();
                self.storage
                    .delivery_logs
                    .finish(log_id, DeliveryStatus::Failed, None, None, Some(&error_message))
                    .await?;
                self.report_failure(job, &event, &subscription, &error_message).await?;
            },
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn active_subscription(&self, delivery: &DeliveryJob) -> Result<Option<Subscription>> {
        let subscription = self.storage.subscriptions.find_by_id(delivery.subscription_id).await?;

        Ok(subscription.filter(|s| s.is_active))
    }

    /// Hands a failed attempt back to the queue for backoff scheduling.
    async fn report_failure(
        &self,
        job: &ClaimedJob,
        event: &Event,
        subscription: &Subscription,
        error_message: &str,
    ) -> Result<()> {
        let outcome = self.queue.fail(job.id, error_message).await?;

        match &outcome {
            FailOutcome::Rescheduled { run_at } => {
                warn!(
                    worker_id = self.id,
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    attempt = job.attempt,
                    next_attempt_at = %run_at,
                    error = error_message,
                    "delivery failed, retry scheduled"
                );
            },
            FailOutcome::Exhausted => {
                error!(
                    worker_id = self.id,
                    event_id = %event.id,
                    subscription_id = %subscription.id,
                    attempt = job.attempt,
                    error = error_message,
                    "delivery permanently failed"
                );
            },
        }

        let mut stats = self.stats.write().await;
        stats.jobs_processed += 1;
        stats.failed_deliveries += 1;
        if outcome == FailOutcome::Exhausted {
            stats.permanent_failures += 1;
        }

        Ok(())
    }
}
