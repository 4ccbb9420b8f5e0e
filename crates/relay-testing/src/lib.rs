//! Test infrastructure for relay integration tests.
//!
//! Each test gets its own PostgreSQL database, created from the server
//! named by `TEST_DATABASE_URL` and migrated on the spot. Tests that need a
//! database call [`TestEnv::new`] and return early when it yields `None`,
//! so the suite degrades to unit coverage on machines without PostgreSQL.
//!
//! Worker loops are not spawned in tests; the [`TestEnv::run_fanout_once`]
//! and [`TestEnv::run_delivery_once`] drivers claim and process one batch
//! synchronously, which keeps retry scenarios deterministic.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_api::{config::Config, create_router, AppState, Environment};
use relay_core::{
    models::Subscription,
    storage::{schema::run_migrations, subscriptions::NewSubscription, Storage},
    RealClock,
};
use relay_delivery::{
    client::{ClientConfig, DeliveryClient},
    fanout::{FanoutConfig, FanoutProcessor},
    signer,
    worker::{DeliveryWorker, WorkerConfig, WorkerStats},
};
use relay_queue::{Queue, QueueConfig, Topic};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Isolated test environment backed by a fresh database.
pub struct TestEnv {
    /// Pool for direct SQL assertions.
    pub pool: PgPool,
    /// Repository container over the same pool.
    pub storage: Arc<Storage>,
    /// Queue over the same pool.
    pub queue: Arc<Queue>,
    db_name: String,
    admin_url: String,
}

impl TestEnv {
    /// Creates an isolated environment with the default queue policy.
    ///
    /// Returns `Ok(None)` when `TEST_DATABASE_URL` is unset so callers can
    /// skip.
    ///
    /// # Errors
    ///
    /// Returns error if database creation or migration fails.
    pub async fn new() -> Result<Option<Self>> {
        Self::with_queue_config(QueueConfig::default()).await
    }

    /// Creates an isolated environment with an instant-retry queue policy,
    /// for retry scenarios that should not sleep.
    ///
    /// # Errors
    ///
    /// Returns error if database creation or migration fails.
    pub async fn new_instant_retry() -> Result<Option<Self>> {
        Self::with_queue_config(QueueConfig {
            base_delay: std::time::Duration::ZERO,
            jitter_factor: 0.0,
            ..QueueConfig::default()
        })
        .await
    }

    /// Creates an isolated environment with a custom queue policy.
    ///
    /// # Errors
    ///
    /// Returns error if database creation or migration fails.
    pub async fn with_queue_config(queue_config: QueueConfig) -> Result<Option<Self>> {
        init_test_tracing();

        let Ok(admin_url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping database-backed test");
            return Ok(None);
        };

        let db_name = format!("relay_test_{}", Uuid::new_v4().simple());

        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&admin_url)
            .await
            .context("failed to connect to TEST_DATABASE_URL")?;
        sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
            .execute(&admin_pool)
            .await
            .context("failed to create test database")?;
        admin_pool.close().await;

        let mut db_url = url::Url::parse(&admin_url).context("TEST_DATABASE_URL is not a URL")?;
        db_url.set_path(&db_name);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url.as_str())
            .await
            .context("failed to connect to test database")?;

        run_migrations(&pool).await.context("failed to run migrations")?;

        let storage = Arc::new(Storage::new(pool.clone()));
        let queue = Arc::new(Queue::new(pool.clone(), queue_config));

        Ok(Some(Self { pool, storage, queue, db_name, admin_url }))
    }

    /// Creates an active subscription with a generated secret.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create_subscription(
        &self,
        event_type: &str,
        target_url: &str,
    ) -> Result<Subscription> {
        let subscription = self
            .storage
            .subscriptions
            .create(&NewSubscription {
                event_type: event_type.to_string(),
                target_url: target_url.to_string(),
                secret_key: signer::generate_secret(),
            })
            .await
            .context("failed to create test subscription")?;

        Ok(subscription)
    }

    /// Claims one batch of fan-out jobs and processes them. Returns how many
    /// jobs were handled.
    ///
    /// # Errors
    ///
    /// Returns error if the claim fails.
    pub async fn run_fanout_once(&self) -> Result<usize> {
        let processor = FanoutProcessor::new(
            self.storage.clone(),
            self.queue.clone(),
            FanoutConfig::default(),
            CancellationToken::new(),
            Arc::new(RealClock::new()),
        );

        let jobs = self.queue.claim(Topic::Fanout, 50).await?;
        let count = jobs.len();
        for job in jobs {
            processor.handle_job(job).await;
        }

        Ok(count)
    }

    /// Claims one batch of delivery jobs and processes them with a default
    /// client. Returns how many jobs were handled.
    ///
    /// # Errors
    ///
    /// Returns error if the claim fails or the client cannot be built.
    pub async fn run_delivery_once(&self) -> Result<usize> {
        self.run_delivery_once_with(ClientConfig::default()).await
    }

    /// Claims one batch of delivery jobs and processes them with the given
    /// client configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the claim fails or the client cannot be built.
    pub async fn run_delivery_once_with(&self, client_config: ClientConfig) -> Result<usize> {
        let worker = DeliveryWorker::new(
            0,
            self.storage.clone(),
            self.queue.clone(),
            Arc::new(DeliveryClient::new(client_config)?),
            WorkerConfig::default(),
            Arc::new(RwLock::new(WorkerStats::default())),
            CancellationToken::new(),
            Arc::new(RealClock::new()),
        );

        let jobs = self.queue.claim(Topic::Delivery, 50).await?;
        let count = jobs.len();
        for job in jobs {
            worker.handle_job(job).await;
        }

        Ok(count)
    }

    /// Runs fan-out then delivery batches until both topics are drained.
    ///
    /// Only meaningful with an instant-retry queue policy; with real backoff
    /// the rescheduled jobs are not yet due and the loop stops early.
    ///
    /// # Errors
    ///
    /// Returns error if any batch fails.
    pub async fn drain_pipeline(&self) -> Result<()> {
        loop {
            let fanned = self.run_fanout_once().await?;
            let delivered = self.run_delivery_once().await?;
            if fanned == 0 && delivered == 0 {
                return Ok(());
            }
        }
    }

    /// Spawns the HTTP app on an ephemeral port and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn spawn_app(&self) -> Result<TestApp> {
        let state = AppState::new(
            self.storage.clone(),
            self.queue.clone(),
            Arc::new(RealClock::new()),
            Environment::Development,
        );
        let router = create_router(state, &Config::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind test listener")?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "test server failed");
            }
        });

        Ok(TestApp { base_url: format!("http://{addr}"), client: reqwest::Client::new() })
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let admin_url = self.admin_url.clone();
        let db_name = self.db_name.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            pool.close().await;
            if let Ok(admin_pool) =
                PgPoolOptions::new().max_connections(1).connect(&admin_url).await
            {
                let _ = sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{db_name}" WITH (FORCE)"#))
                    .execute(&admin_pool)
                    .await;
                admin_pool.close().await;
            }
        });
    }
}

/// Handle to a spawned test server.
pub struct TestApp {
    /// `http://127.0.0.1:<port>`
    pub base_url: String,
    /// Shared client for requests against the app.
    pub client: reqwest::Client,
}

impl TestApp {
    /// Full URL for a path on this app.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
