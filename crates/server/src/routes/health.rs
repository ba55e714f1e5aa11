//! Health check endpoint

use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    concurrency: usize,
    interval_cap: usize,
    interval_ms: u64,
    max_attempts: u32,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    llm_configured: bool,
    fhir_configured: bool,
    queue: QueueSummary,
}

/// GET /health - Liveness plus which upstreams are configured
pub async fn check(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = &state.config.queue;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        llm_configured: state.llm_configured(),
        fhir_configured: state.fhir_configured(),
        queue: QueueSummary {
            concurrency: queue.concurrency,
            interval_cap: queue.interval_cap,
            interval_ms: queue.interval.as_millis() as u64,
            max_attempts: queue.retry.max_attempts,
        },
    })
}
