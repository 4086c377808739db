//! Simulation Engine Port (Driven Port)
//!
//! Interface to the numerical backtest engine. The scheduler hands it a
//! normalized configuration, a progress callback, and a cancellation token,
//! and gets back an opaque result payload.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::job::{BacktestConfig, BacktestResult};

/// Progress sink handed to the engine. Takes a percentage in `[0, 100]`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Per-fill execution cost assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCosts {
    /// Fee as a fraction of notional.
    pub trading_fee: f64,
    /// Slippage as a fraction of price.
    pub slippage: f64,
}

/// Position sizing and exit rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskParameters {
    /// Max fraction of equity per position.
    pub max_position_size: f64,
    /// Max simultaneously open positions.
    pub max_concurrent_positions: u32,
    /// Drawdown at which trading halts.
    pub max_drawdown_limit: f64,
    /// Fraction of equity risked per trade.
    pub risk_per_trade: f64,
    /// Stop-loss distance.
    pub stop_loss_percent: f64,
    /// Take-profit distance.
    pub take_profit_percent: f64,
}

/// Engine-facing view of a job's configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Trading pairs.
    pub symbols: Vec<String>,
    /// Candle timeframe.
    pub timeframe: String,
    /// Range start.
    pub start: DateTime<Utc>,
    /// Range end.
    pub end: DateTime<Utc>,
    /// Starting balance.
    pub initial_balance: f64,
    /// Cost model.
    pub costs: ExecutionCosts,
    /// Risk model.
    pub risk: RiskParameters,
    /// Model label.
    pub model_name: String,
}

impl From<&BacktestConfig> for EngineConfig {
    fn from(config: &BacktestConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            timeframe: config.timeframe.clone(),
            start: config.start_date,
            end: config.end_date,
            initial_balance: config.initial_balance,
            costs: ExecutionCosts {
                trading_fee: config.trading_fee,
                slippage: config.slippage,
            },
            risk: RiskParameters {
                max_position_size: config.max_position_size,
                max_concurrent_positions: config.max_concurrent_positions,
                max_drawdown_limit: config.max_drawdown_limit,
                risk_per_trade: config.risk_per_trade,
                stop_loss_percent: config.stop_loss_percent,
                take_profit_percent: config.take_profit_percent,
            },
            model_name: config.model_name.clone(),
        }
    }
}

/// Port for running a single simulation.
///
/// Implementations must check `cancel` at least once per progress report
/// and return promptly once it fires.
#[async_trait]
pub trait SimulationEngine: Send + Sync {
    /// Run the simulation to completion, failure, or cancellation.
    async fn run(
        &self,
        config: EngineConfig,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<BacktestResult, EngineError>;

    /// Engine name for logs.
    fn name(&self) -> &'static str;
}

/// Engine failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The simulation raised an error.
    #[error("{message}")]
    Failed {
        /// Error details.
        message: String,
    },

    /// The simulation stopped early on request.
    #[error("simulation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Create a failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
