//! Health Check and Metrics Endpoints
//!
//! Routes merged into the API router for container orchestrators, load
//! balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (accepting submissions)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::BacktestScheduler;
use crate::domain::registry::StatusCounts;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Scheduler state.
    pub scheduler: SchedulerStatus,
    /// Status stream listeners.
    pub stream_receivers: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting and running jobs.
    Healthy,
    /// Shutting down; existing jobs are draining.
    Draining,
}

/// Scheduler occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether new submissions are accepted.
    pub accepting: bool,
    /// Occupied execution slots.
    pub slots_in_use: usize,
    /// Concurrency ceiling.
    pub max_concurrent: usize,
    /// Jobs by status.
    pub jobs: StatusCounts,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health routes.
#[derive(Debug)]
pub struct HealthState {
    version: String,
    started_at: Instant,
    scheduler: Arc<BacktestScheduler>,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(version: String, scheduler: Arc<BacktestScheduler>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            scheduler,
        }
    }
}

/// Health, liveness, readiness, and metrics routes.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Draining => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.scheduler.is_accepting() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let scheduler = &state.scheduler;
    let accepting = scheduler.is_accepting();

    HealthResponse {
        status: determine_health_status(accepting),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        scheduler: SchedulerStatus {
            accepting,
            slots_in_use: scheduler.occupied_slots(),
            max_concurrent: scheduler.settings().max_concurrent,
            jobs: scheduler.counts(),
        },
        stream_receivers: scheduler.events().stats().job_events_receivers,
    }
}

const fn determine_health_status(accepting: bool) -> HealthStatus {
    if accepting {
        HealthStatus::Healthy
    } else {
        HealthStatus::Draining
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Draining).unwrap(),
            "\"draining\""
        );
    }

    #[test]
    fn status_follows_admission() {
        assert_eq!(determine_health_status(true), HealthStatus::Healthy);
        assert_eq!(determine_health_status(false), HealthStatus::Draining);
    }
}
