//! HTTP API (Driver Adapter)
//!
//! Axum router exposing the scheduler plus the health and metrics routes.
//!
//! # Endpoints
//!
//! - `POST   /api/backtest` - submit a job
//! - `GET    /api/backtest?id=&stream=&list=` - point, stream, or list read
//! - `GET    /api/backtest/{id}[?stream=true]` - point or stream read
//! - `DELETE /api/backtest?id=` and `/api/backtest/{id}` - cancel and remove
//! - `POST   /api/backtest/{id}/cancel` - cancel, keep the record

mod error;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::{ApiError, ErrorBody, ErrorCode};
pub use handlers::{
    ApiState, BacktestQuery, CreateResponse, ListResponse, MessageResponse, RecordResponse,
};

use crate::infrastructure::health::{self, HealthState};

/// Build the full application router.
pub fn create_router(state: ApiState, health: Arc<HealthState>) -> Router {
    Router::new()
        .route(
            "/api/backtest",
            post(handlers::create_backtest)
                .get(handlers::read_backtests)
                .delete(handlers::delete_backtest_by_query),
        )
        .route(
            "/api/backtest/{id}",
            get(handlers::read_backtest).delete(handlers::delete_backtest),
        )
        .route("/api/backtest/{id}/cancel", post(handlers::cancel_backtest))
        .with_state(state)
        .merge(health::router(health))
}

// =============================================================================
// Server
// =============================================================================

/// API HTTP server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(addr: SocketAddr, router: Router, cancel: CancellationToken) -> Self {
        Self {
            addr,
            router,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.addr, e.to_string()))?;

        tracing::info!(addr = %self.addr, "API server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
