//! Backtest job entity.
//!
//! - `config`: submission parameters, defaults and validation
//! - `record`: the job record and its transitions
//! - `status`: lifecycle states

mod config;
mod record;
mod status;

pub use config::{
    BacktestConfig, BacktestConfigError, BacktestRequest, DEFAULT_DAYS, DEFAULT_MODEL_NAME,
    DEFAULT_SYMBOLS, DEFAULT_TIMEFRAME, SUPPORTED_TIMEFRAMES,
};
pub use record::{BacktestResult, DateRange, JobId, JobRecord, TransitionError};
pub use status::JobStatus;
