//! Backtest API handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::application::services::{
    BacktestScheduler, CancelOutcome, JobListing, StatusPublisher, SubmitReceipt,
};
use crate::domain::job::{BacktestConfig, BacktestRequest, JobId, JobRecord, JobStatus};

/// State shared by the backtest handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    scheduler: Arc<BacktestScheduler>,
    publisher: StatusPublisher,
}

impl ApiState {
    /// Create handler state.
    #[must_use]
    pub const fn new(scheduler: Arc<BacktestScheduler>, publisher: StatusPublisher) -> Self {
        Self {
            scheduler,
            publisher,
        }
    }
}

// =============================================================================
// Request and Response Types
// =============================================================================

/// Query parameters for `GET` and `DELETE /api/backtest`.
#[derive(Debug, Default, Deserialize)]
pub struct BacktestQuery {
    /// Job id.
    pub id: Option<String>,
    /// `true` or `1` opens a status stream.
    pub stream: Option<String>,
    /// `true` or `1` forces a list read.
    pub list: Option<String>,
}

/// Query parameters for the path-style read.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// `true` or `1` opens a status stream.
    pub stream: Option<String>,
}

fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

/// Create response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    /// Always true.
    pub success: bool,
    /// New job id.
    pub backtest_id: JobId,
    /// Normalized configuration.
    pub config: BacktestConfig,
    /// `running` or `queued`.
    pub status: JobStatus,
    /// Human-readable summary.
    pub message: String,
    /// 1-based queue position when queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl From<SubmitReceipt> for CreateResponse {
    fn from(receipt: SubmitReceipt) -> Self {
        let message = match receipt.queue_position {
            Some(position) => format!("Backtest queued at position {position}"),
            None => "Backtest started".to_string(),
        };
        Self {
            success: true,
            backtest_id: receipt.id,
            config: receipt.config,
            status: receipt.status,
            message,
            queue_position: receipt.queue_position,
        }
    }
}

/// Point read response.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    /// Always true.
    pub success: bool,
    /// The job.
    pub backtest: JobRecord,
}

/// List read response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Always true.
    pub success: bool,
    /// Jobs and counts.
    #[serde(flatten)]
    pub listing: JobListing,
}

/// Cancel and delete response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Always true.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /api/backtest`. An empty body submits all defaults.
pub async fn create_backtest(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<CreateResponse>, ApiError> {
    let request: BacktestRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BacktestRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let receipt = state.scheduler.submit(request)?;
    Ok(Json(receipt.into()))
}

/// `GET /api/backtest?id=&stream=&list=`.
pub async fn read_backtests(
    State(state): State<ApiState>,
    query: Result<Query<BacktestQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    match query.id.filter(|id| !id.is_empty()) {
        Some(id) if !flag(query.list.as_deref()) => {
            read_one(&state, &JobId::new(id), flag(query.stream.as_deref()))
        }
        _ => Ok(list(&state).into_response()),
    }
}

/// `GET /api/backtest/{id}[?stream=true]`.
pub async fn read_backtest(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    read_one(&state, &JobId::new(id), flag(query.stream.as_deref()))
}

/// `DELETE /api/backtest?id=`.
pub async fn delete_backtest_by_query(
    State(state): State<ApiState>,
    query: Result<Query<BacktestQuery>, QueryRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Query(query) = query?;
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::invalid("missing required query parameter: id"))?;
    delete(&state, &JobId::new(id))
}

/// `DELETE /api/backtest/{id}`.
pub async fn delete_backtest(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    delete(&state, &JobId::new(id))
}

/// `POST /api/backtest/{id}/cancel`. The record stays visible.
pub async fn cancel_backtest(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = JobId::new(id);
    let message = match state.scheduler.cancel(&id)? {
        CancelOutcome::Cancelled { .. } => format!("Backtest {id} cancelled"),
        CancelOutcome::AlreadyFinished(status) => {
            format!("Backtest {id} already {status}")
        }
    };
    Ok(Json(MessageResponse {
        success: true,
        message,
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn list(state: &ApiState) -> Json<ListResponse> {
    Json(ListResponse {
        success: true,
        listing: state.publisher.list(),
    })
}

fn read_one(state: &ApiState, id: &JobId, stream: bool) -> Result<Response, ApiError> {
    if !stream {
        let backtest = state.publisher.get(id)?;
        return Ok(Json(RecordResponse {
            success: true,
            backtest,
        })
        .into_response());
    }

    let frames = state.publisher.stream(id)?.map(|record| {
        let event = Event::default().event("status");
        Ok::<_, Infallible>(event.json_data(&record).unwrap_or_else(|e| {
            tracing::warn!(job_id = %record.id, error = %e, "Failed to encode status frame");
            Event::default().event("error").data(e.to_string())
        }))
    });
    tracing::debug!(job_id = %id, "Status stream opened");
    Ok(Sse::new(frames)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn delete(state: &ApiState, id: &JobId) -> Result<Json<MessageResponse>, ApiError> {
    let message = match state.scheduler.delete(id)? {
        CancelOutcome::Cancelled { .. } => format!("Backtest {id} cancelled and removed"),
        CancelOutcome::AlreadyFinished(_) => format!("Backtest {id} removed"),
    };
    Ok(Json(MessageResponse {
        success: true,
        message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_true_and_one() {
        assert!(flag(Some("true")));
        assert!(flag(Some("TRUE")));
        assert!(flag(Some("1")));
        assert!(!flag(Some("false")));
        assert!(!flag(Some("")));
        assert!(!flag(None));
    }
}
