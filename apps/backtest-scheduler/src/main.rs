//! Backtest Scheduler Binary
//!
//! Starts the backtest job service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin backtest-scheduler
//! ```
//!
//! # Environment Variables
//!
//! - `BACKTEST_HTTP_HOST`: Bind address (default: 0.0.0.0)
//! - `BACKTEST_HTTP_PORT`: HTTP port (default: 8090)
//! - `BACKTEST_MAX_CONCURRENT`: Concurrent simulations (default: 3)
//! - `BACKTEST_HISTORY_LIMIT`: Jobs kept in the persisted index (default: 50)
//! - `BACKTEST_DATA_DIR`: Index and artifact root (default: ./data/backtests)
//! - `BACKTEST_PERSISTENCE`: file | memory (default: file)
//! - `BACKTEST_STREAM_POLL_MS`: Status stream fallback poll (default: 500)
//! - `BACKTEST_JOB_TIMEOUT_SECS`: Per-job timeout, 0 disables (default: 0)
//! - `BACKTEST_EVENT_CAPACITY`: Job event channel capacity (default: 1024)
//! - `BACKTEST_ENGINE_TICK_MS`: Synthetic engine delay per candle (default: 25)
//! - `LOG_FORMAT`: pretty | json (default: pretty)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use backtest_scheduler::infrastructure::broadcast::{BroadcastConfig, JobEventHub};
use backtest_scheduler::infrastructure::health::HealthState;
use backtest_scheduler::infrastructure::telemetry;
use backtest_scheduler::{
    ApiServer, ApiState, BacktestScheduler, InMemoryJobStore, JobStore, JsonFileStore,
    PersistenceMode, SchedulerConfig, StatusPublisher, SyntheticEngine, create_router,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    telemetry::init();

    tracing::info!("Starting Backtest Scheduler");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = SchedulerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn JobStore> = match config.storage.mode {
        PersistenceMode::File => {
            let store = JsonFileStore::new(&config.storage.data_dir);
            tracing::info!(root = %store.root().display(), "Using JSON file job store");
            Arc::new(store)
        }
        PersistenceMode::Memory => {
            tracing::warn!("Using in-memory job store, jobs will not survive a restart");
            Arc::new(InMemoryJobStore::new())
        }
    };
    let engine = Arc::new(SyntheticEngine::new(config.engine.tick_delay));
    let events = Arc::new(JobEventHub::new(BroadcastConfig {
        job_events_capacity: config.stream.event_capacity,
    }));

    let (scheduler, recovery) =
        BacktestScheduler::new(config.scheduler, store, engine, Arc::clone(&events));
    tracing::info!(
        loaded = recovery.loaded,
        orphaned = recovery.orphaned,
        load_failed = recovery.load_failed,
        "Recovery report"
    );

    let publisher = StatusPublisher::new(Arc::clone(&scheduler), config.stream.poll_interval);
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&scheduler),
    ));
    let router = create_router(
        ApiState::new(Arc::clone(&scheduler), publisher),
        health_state,
    );
    let server = ApiServer::new(config.server.bind_addr(), router, shutdown_token.clone());

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Backtest scheduler ready");

    await_shutdown(shutdown_token).await;

    scheduler.shutdown();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            running = scheduler.occupied_slots(),
            "Shutdown timeout elapsed with simulations still running"
        );
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle)
        .await
        .is_err()
    {
        tracing::warn!("API server did not stop within the shutdown timeout");
    }

    tracing::info!("Backtest scheduler stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &SchedulerConfig) {
    tracing::info!(
        addr = %config.server.bind_addr(),
        max_concurrent = config.scheduler.max_concurrent,
        history_limit = config.scheduler.history_limit,
        persistence = config.storage.mode.as_str(),
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );
    tracing::debug!(
        poll_ms = u64::try_from(config.stream.poll_interval.as_millis()).unwrap_or(u64::MAX),
        event_capacity = config.stream.event_capacity,
        job_timeout_secs = config.scheduler.job_timeout.map_or(0, |t| t.as_secs()),
        tick_ms = u64::try_from(config.engine.tick_delay.as_millis()).unwrap_or(u64::MAX),
        "Stream and engine settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
