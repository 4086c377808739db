#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Backtest Scheduler - Simulation Job Service
//!
//! Accepts backtest requests over HTTP, runs at most `MAX_CONCURRENT`
//! simulations at once, queues the rest in submission order, and exposes
//! job state as point reads, list reads, and server-sent event streams.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Job entity and registry
//!   - `job`: Job record, configuration validation, status state machine
//!   - `registry`: In-memory map of job records with ordering helpers
//!
//! - **Application**: Services and port definitions
//!   - `ports`: Simulation engine and job store interfaces
//!   - `services`: Admission control, execution, publishing, recovery
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: Axum API routes and server
//!   - `engine`: Synthetic and scripted simulation engines
//!   - `persistence`: JSON file and in-memory job stores
//!   - `broadcast`: Job event channel feeding status streams
//!   - `config`: Environment configuration
//!   - `health`: Health, liveness, readiness, and metrics routes
//!
//! # Data Flow
//!
//! ```text
//!  POST /api/backtest ──► Scheduler ──► Executor ──► SimulationEngine
//!                           │   ▲           │ progress / outcome
//!                           │   └───────────┘
//!                           ├──► JobStore (index + artifacts)
//!                           └──► JobEventHub ──► StatusPublisher ──► SSE
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Job entity and registry with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::job::{
    BacktestConfig, BacktestConfigError, BacktestRequest, BacktestResult, DateRange, JobId,
    JobRecord, JobStatus,
};
pub use domain::registry::{JobRegistry, StatusCounts};

// Ports
pub use application::ports::{
    EngineConfig, EngineError, JobStore, PersistenceError, ProgressCallback, SimulationEngine,
};

// Services
pub use application::services::{
    BacktestScheduler, CancelOutcome, JobListing, RecoveryReport, SchedulerError,
    SchedulerSettings, StatusPublisher, SubmitReceipt,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, PersistenceMode, SchedulerConfig};

// HTTP
pub use infrastructure::http::{ApiServer, ApiServerError, ApiState, create_router};

// Adapters
pub use infrastructure::broadcast::{
    BroadcastConfig, JobEvent, JobEventHub, JobEventKind, SharedJobEventHub,
};
pub use infrastructure::engine::{RunHandle, ScriptedEngine, SyntheticEngine};
pub use infrastructure::persistence::{InMemoryJobStore, JsonFileStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, init as init_telemetry};
