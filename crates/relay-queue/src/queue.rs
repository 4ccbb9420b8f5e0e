//! Durable job queue on PostgreSQL.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED` so any number of workers
//! can pull concurrently without blocking each other. Retry scheduling uses
//! exponential backoff with jitter; a job left `running` past the stall
//! window is treated as abandoned and handed out again.
//!
//! The queue is deliberately not transactional with the store. Fan-out
//! redelivery can enqueue duplicate delivery jobs; the delivery worker
//! re-reads store state on every attempt, and subscribers dedupe on
//! `X-Event-Id`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{QueueError, Result},
    job::{ClaimedJob, DeliveryJob, FanoutJob, Topic},
};

/// Retry and dispatch policy for the queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delivery attempts allowed in total, including the first.
    pub max_delivery_attempts: i32,

    /// Base delay for exponential backoff.
    pub base_delay: Duration,

    /// Cap on any single backoff delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied to backoff delays.
    pub jitter_factor: f64,

    /// How long a job may sit `running` before it is considered stalled and
    /// re-dispatched.
    pub stall_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
            stall_window: Duration::from_secs(300),
        }
    }
}

/// What happened to a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Attempts remain; the job will be dispatched again at `run_at`.
    Rescheduled {
        /// When the next attempt becomes due.
        run_at: DateTime<Utc>,
    },

    /// Attempts exhausted; the job is permanently failed.
    Exhausted,
}

/// Per-status job counts for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    /// Jobs waiting for dispatch.
    pub queued: i64,
    /// Jobs currently held by a worker.
    pub running: i64,
    /// Jobs that exhausted their attempts.
    pub failed: i64,
}

/// Handle to the durable job queue.
#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
    config: QueueConfig,
}

impl Queue {
    /// Creates a queue handle over an existing pool.
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Returns the configured policy.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueues a fan-out job. Fan-out is not retried with backoff: the
    /// expensive, failure-prone step is the outbound HTTP, not the local
    /// expansion.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded or the insert fails.
    pub async fn enqueue_fanout(&self, job: &FanoutJob) -> Result<Uuid> {
        self.enqueue(Topic::Fanout, serde_json::to_value(job)?, 1).await
    }

    /// Enqueues a delivery job with the configured retry budget.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded or the insert fails.
    pub async fn enqueue_delivery(&self, job: &DeliveryJob) -> Result<Uuid> {
        self.enqueue(Topic::Delivery, serde_json::to_value(job)?, self.config.max_delivery_attempts)
            .await
    }

    async fn enqueue(
        &self,
        topic: Topic,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO queue_jobs (id, topic, payload, status, attempts_made, max_attempts, run_at)
            VALUES ($1, $2, $3, 'queued', 0, $4, NOW())
            RETURNING id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(topic.as_str())
        .bind(payload)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = %id, topic = %topic, "job enqueued");

        Ok(id)
    }

    /// Claims up to `batch_size` due jobs on a topic.
    ///
    /// A claim increments `attempts_made`, so the returned attempt number is
    /// 1-based and already counts this dispatch. Stalled `running` jobs are
    /// reclaimed by the same query.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim(&self, topic: Topic, batch_size: usize) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let stall_cutoff = now
            - chrono::Duration::from_std(self.config.stall_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut tx = self.pool.begin().await?;

        let job_ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT id FROM queue_jobs
            WHERE topic = $1
              AND (
                    (status = 'queued' AND run_at <= $2)
                 OR (status = 'running' AND locked_at <= $3)
              )
            ORDER BY run_at ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(topic.as_str())
        .bind(now)
        .bind(stall_cutoff)
        .bind(i64::try_from(batch_size).unwrap_or(100))
        .fetch_all(&mut *tx)
        .await?;

        if job_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let rows: Vec<(Uuid, serde_json::Value, i32, i32)> = sqlx::query_as(
            r"
            UPDATE queue_jobs
            SET status = 'running', attempts_made = attempts_made + 1, locked_at = NOW()
            WHERE id = ANY($1)
            RETURNING id, payload, attempts_made, max_attempts
            ",
        )
        .bind(&job_ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(topic = %topic, claimed = rows.len(), "claimed queue jobs");

        Ok(rows
            .into_iter()
            .map(|(id, payload, attempt, max_attempts)| ClaimedJob {
                id,
                payload,
                attempt,
                max_attempts,
            })
            .collect())
    }

    /// Completes a job. The row is removed; the delivery log is the durable
    /// record of what happened.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reports a failed attempt.
    ///
    /// Reschedules with backoff while attempts remain, otherwise marks the
    /// job permanently failed.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::JobNotFound` if the job no longer exists.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<FailOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i32, i32)> = sqlx::query_as(
            "SELECT attempts_made, max_attempts FROM queue_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts_made, max_attempts)) = row else {
            tx.rollback().await?;
            return Err(QueueError::JobNotFound(job_id));
        };

        if attempts_made >= max_attempts {
            sqlx::query(
                r"
                UPDATE queue_jobs
                SET status = 'failed', locked_at = NULL, last_error = $2
                WHERE id = $1
                ",
            )
            .bind(job_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(FailOutcome::Exhausted);
        }

        let delay = apply_jitter(
            self.backoff_delay(attempts_made),
            self.config.jitter_factor,
            self.config.max_delay,
        );
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

        sqlx::query(
            r"
            UPDATE queue_jobs
            SET status = 'queued', locked_at = NULL, run_at = $2, last_error = $3
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(FailOutcome::Rescheduled { run_at })
    }

    /// Marks a job permanently failed regardless of remaining attempts.
    ///
    /// Used for fatal conditions where retrying has no value, e.g. the
    /// referenced event no longer exists.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE queue_jobs
            SET status = 'failed', locked_at = NULL, last_error = $2
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Per-status job counts.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM queue_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "queued" => counts.queued = count,
                "running" => counts.running = count,
                "failed" => counts.failed = count,
                _ => {},
            }
        }

        Ok(counts)
    }

    /// Unjittered backoff before the attempt following `failed_attempts`
    /// failures: `base * 2^(failed_attempts - 1)`, capped at `max_delay`.
    ///
    /// With the 2 s default the sequence is 2s, 4s, 8s, ...
    fn backoff_delay(&self, failed_attempts: i32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).clamp(0, 20) as u32;
        let multiplier = 2_u32.saturating_pow(exponent);
        std::cmp::min(self.config.base_delay * multiplier, self.config.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` to spread retry load.
fn apply_jitter(duration: Duration, jitter_factor: f64, max_delay: Duration) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);
    let jittered = Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0));

    std::cmp::min(jittered, max_delay)
}
