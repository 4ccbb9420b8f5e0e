//! Router assembly and server lifecycle.
//!
//! Requests flow through the middleware stack in order: request logging and
//! ID injection, CORS, tracing, timeout, body-size limit, then the handler.
//! Shutdown is cooperative: the listener drains in-flight requests before
//! the caller quiesces the worker pool.

use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::{config::Config, handlers, middleware::log_requests, AppState, Environment};

/// Request envelope cap: 10 MiB. The 1 MiB payload cap is enforced by the
/// ingestion handler on the serialized payload field.
const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Builds the complete application router.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let cors = match config.environment {
        Environment::Development => CorsLayer::permissive(),
        Environment::Production => CorsLayer::new(),
    };

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/events", post(handlers::ingest_event))
        .route("/api/v1/events/{id}", get(handlers::get_event))
        .route(
            "/api/v1/admin/subscriptions",
            get(handlers::list_subscriptions).post(handlers::create_subscription),
        )
        .route(
            "/api/v1/admin/subscriptions/{id}",
            put(handlers::update_subscription).delete(handlers::delete_subscription),
        )
        .route("/api/v1/admin/delivery-logs", get(handlers::list_delivery_logs))
        .route("/api/v1/admin/delivery-logs/{id}/retry", post(handlers::retry_delivery))
        .route("/api/v1/admin/stats", get(handlers::get_stats))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(log_requests))
}

/// Waits for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
