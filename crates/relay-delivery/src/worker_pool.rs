//! Worker pool lifecycle: spawns the fan-out processor and delivery workers,
//! and drains them cooperatively on shutdown.

use std::{sync::Arc, time::Duration};

use relay_core::{storage::Storage, Clock};
use relay_queue::Queue;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::DeliveryClient,
    error::{DeliveryError, Result},
    fanout::{FanoutConfig, FanoutProcessor},
    worker::{DeliveryWorker, WorkerConfig, WorkerStats},
};

/// Supervises the fan-out processor and the delivery worker pool.
pub struct WorkerPool {
    storage: Arc<Storage>,
    queue: Arc<Queue>,
    client: Arc<DeliveryClient>,
    worker_config: WorkerConfig,
    fanout_config: FanoutConfig,
    stats: Arc<RwLock<WorkerStats>>,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a new worker pool. Call [`spawn`](Self::spawn) to start it.
    pub fn new(
        storage: Arc<Storage>,
        queue: Arc<Queue>,
        client: Arc<DeliveryClient>,
        worker_config: WorkerConfig,
        fanout_config: FanoutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            queue,
            client,
            worker_config,
            fanout_config,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            cancellation_token: CancellationToken::new(),
            handles: Vec::new(),
            clock,
        }
    }

    /// Spawns the fan-out consumer and the configured number of delivery
    /// workers. Returns immediately.
    pub fn spawn(&mut self) {
        info!(
            delivery_workers = self.worker_config.concurrency,
            "spawning relay worker pool"
        );

        let fanout = FanoutProcessor::new(
            self.storage.clone(),
            self.queue.clone(),
            self.fanout_config.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );
        self.handles.push(tokio::spawn(async move { fanout.run().await }));

        for worker_id in 0..self.worker_config.concurrency {
            let worker = DeliveryWorker::new(
                worker_id,
                self.storage.clone(),
                self.queue.clone(),
                self.client.clone(),
                self.worker_config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );
            self.handles.push(tokio::spawn(async move { worker.run().await }));
        }
    }

    /// Returns a snapshot of the shared counters.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Signals cancellation and waits for every worker to finish its current
    /// job.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the shutdown timeout is
    /// exceeded; the queue redelivers anything unconfirmed after its stall
    /// window.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            workers = self.handles.len(),
            timeout_seconds = timeout.as_secs(),
            "draining relay worker pool"
        );

        self.cancellation_token.cancel();

        let drain = async {
            for (index, handle) in std::mem::take(&mut self.handles).into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        warn!(worker = index, error = %e, "worker finished with error during drain");
                    },
                    Err(join_err) => {
                        error!(worker = index, error = %join_err, "worker task panicked");
                    },
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => {
                info!("relay worker pool drained");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker drain timed out, queue will redeliver unconfirmed jobs"
                );
                Err(DeliveryError::configuration("worker shutdown timed out"))
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.handles.iter().any(|h| !h.is_finished()) && !self.cancellation_token.is_cancelled()
        {
            warn!("WorkerPool dropped without shutdown_graceful, cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}
