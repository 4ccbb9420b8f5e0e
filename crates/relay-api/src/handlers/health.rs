//! Liveness probe.
//!
//! Deliberately does not touch the store or queue so probe traffic stays
//! cheap; orchestration readiness is the operator's concern.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process answers.
    pub status: &'static str,
    /// Process uptime in seconds.
    pub uptime: u64,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response =
        HealthResponse { status: "ok", uptime: state.started_at.elapsed().as_secs() };

    (StatusCode::OK, Json(response))
}
