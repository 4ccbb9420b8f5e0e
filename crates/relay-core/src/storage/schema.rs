//! Idempotent schema setup for the relay tables.
//!
//! Uniqueness rules the pipeline depends on live here: the unique index on
//! `events.idempotency_key` is the ingestion serialization point, and the
//! partial unique index on `subscriptions` enforces the single-active-pair
//! rule.

use sqlx::PgPool;

use crate::error::Result;

/// Creates all tables and indexes if they do not exist.
///
/// Safe to run on every startup.
///
/// # Errors
///
/// Returns error if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            idempotency_key TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency_key
        ON events(idempotency_key)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_event_type ON events(event_type)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_received_at ON events(received_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            target_url TEXT NOT NULL,
            secret_key TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_active_pair
        ON subscriptions(event_type, target_url)
        WHERE is_active
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_subscriptions_type_active
        ON subscriptions(event_type, is_active)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS delivery_logs (
            id UUID PRIMARY KEY,
            event_id UUID NOT NULL REFERENCES events(id),
            subscription_id UUID NOT NULL,
            target_url TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            attempted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            response_status_code INTEGER,
            response_body TEXT,
            error_message TEXT
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_delivery_logs_attempted_at
        ON delivery_logs(attempted_at)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_delivery_logs_event_subscription
        ON delivery_logs(event_id, subscription_id)
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS queue_jobs (
            id UUID PRIMARY KEY,
            topic TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            attempts_made INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            locked_at TIMESTAMPTZ,
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_queue_jobs_topic_status_run_at
        ON queue_jobs(topic, status, run_at)
        ",
    )
    .execute(pool)
    .await?;

    Ok(())
}
