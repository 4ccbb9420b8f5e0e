//! Event relay service entry point.
//!
//! Startup order matters: store first, then queue, then workers, then the
//! HTTP listener, so nothing accepts traffic before its downstream exists.
//! Shutdown reverses it: the listener drains in-flight requests, workers
//! finish their current attempts, connections close last.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use relay_api::{create_router, server::shutdown_signal, AppState, Config};
use relay_core::{storage::schema::run_migrations, storage::Storage, RealClock};
use relay_delivery::{client::DeliveryClient, worker_pool::WorkerPool};
use relay_queue::Queue;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);

    info!(
        database_url = %config.database_url_masked(),
        port = config.port,
        environment = ?config.environment,
        webhook_concurrency = config.webhook_concurrency,
        max_retry_attempts = config.max_retry_attempts,
        "starting webhook relay"
    );

    let pool = create_database_pool(&config).await?;
    run_migrations(&pool).await.context("failed to run migrations")?;
    info!("database ready");

    let clock = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(pool.clone()));
    let queue = Arc::new(Queue::new(pool.clone(), config.to_queue_config()));
    let client = Arc::new(
        DeliveryClient::new(config.to_client_config())
            .context("failed to build delivery client")?,
    );

    let mut worker_pool = WorkerPool::new(
        storage.clone(),
        queue.clone(),
        client,
        config.to_worker_config(),
        config.to_fanout_config(),
        clock.clone(),
    );
    worker_pool.spawn();

    let state = AppState::new(storage, queue, clock, config.environment);
    let router = create_router(state, &config);

    let addr = config.parse_server_addr()?;
    let listener =
        tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP listener")?;
    info!(addr = %listener.local_addr()?, "relay is accepting events");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    info!("HTTP listener drained");

    if let Err(e) = worker_pool.shutdown_graceful(Duration::from_secs(30)).await {
        error!(error = %e, "worker drain incomplete, queue will redeliver");
    }

    pool.close().await;
    info!("relay shutdown complete");

    Ok(())
}

/// Initializes tracing; `RUST_LOG` wins over the configured default filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool, retrying while the database comes
/// up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(attempt = retries, max_retries = MAX_RETRIES, "database not ready, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}
