//! Scripted engine for testing.
//!
//! Every `run` call parks until the test drives it through the
//! [`RunHandle`] it receives from [`ScriptedEngine::next_run`].

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EngineConfig, EngineError, ProgressCallback, SimulationEngine};
use crate::domain::job::{BacktestResult, DateRange};

#[derive(Debug)]
enum Script {
    Return(Result<BacktestResult, EngineError>),
    Panic(String),
}

/// Test-side control over one engine run.
pub struct RunHandle {
    config: EngineConfig,
    progress: ProgressCallback,
    cancel: CancellationToken,
    finish: oneshot::Sender<Script>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    /// Configuration the run was started with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cancellation token handed to the run.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report progress through the scheduler's callback.
    pub fn report(&self, percent: f64) {
        (self.progress)(percent);
    }

    /// Finish with a sample result.
    pub fn complete(self) {
        let result = sample_result(&self.config);
        self.finish_with(Ok(result));
    }

    /// Finish with an engine error.
    pub fn fail(self, message: &str) {
        self.finish_with(Err(EngineError::failed(message)));
    }

    /// Finish with an explicit outcome.
    pub fn finish_with(self, result: Result<BacktestResult, EngineError>) {
        let _ = self.finish.send(Script::Return(result));
    }

    /// Make the run panic with `message`.
    pub fn panic(self, message: &str) {
        let _ = self.finish.send(Script::Panic(message.to_string()));
    }
}

/// Engine whose runs are driven by the test.
#[derive(Debug)]
pub struct ScriptedEngine {
    started_tx: mpsc::UnboundedSender<RunHandle>,
    started_rx: Mutex<mpsc::UnboundedReceiver<RunHandle>>,
    honour_cancel: bool,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Runs return [`EngineError::Cancelled`] as soon as their token fires.
    #[must_use]
    pub fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            started_tx,
            started_rx: Mutex::new(started_rx),
            honour_cancel: true,
        }
    }

    /// Runs ignore their token and only return when finished by the test.
    #[must_use]
    pub fn ignoring_cancel() -> Self {
        Self {
            honour_cancel: false,
            ..Self::new()
        }
    }

    /// Wait for the next run to start.
    pub async fn next_run(&self) -> Option<RunHandle> {
        self.started_rx.lock().await.recv().await
    }

    /// Take a run that has already started, if any.
    pub async fn try_next_run(&self) -> Option<RunHandle> {
        self.started_rx.lock().await.try_recv().ok()
    }
}

#[async_trait]
impl SimulationEngine for ScriptedEngine {
    async fn run(
        &self,
        config: EngineConfig,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<BacktestResult, EngineError> {
        let (finish, finished) = oneshot::channel();
        let handle = RunHandle {
            config,
            progress,
            cancel: cancel.clone(),
            finish,
        };
        if self.started_tx.send(handle).is_err() {
            return Err(EngineError::failed("scripted engine dropped"));
        }

        let script = if self.honour_cancel {
            tokio::select! {
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                script = finished => script,
            }
        } else {
            finished.await
        };

        match script {
            Ok(Script::Return(result)) => result,
            Ok(Script::Panic(message)) => panic!("{message}"),
            Err(_) => Err(EngineError::failed("run handle dropped")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Minimal well-formed result for `config`.
#[must_use]
pub fn sample_result(config: &EngineConfig) -> BacktestResult {
    BacktestResult {
        portfolio: json!({ "equity": config.initial_balance }),
        trades: vec![],
        metrics: json!({ "totalReturn": 0.0 }),
        equity_curve: vec![json!({ "timestamp": config.end, "equity": config.initial_balance })],
        signals: vec![],
        date_range: DateRange {
            start: config.start,
            end: config.end,
        },
        duration: 1,
    }
}
