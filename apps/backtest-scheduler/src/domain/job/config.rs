//! Backtest submission parameters.
//!
//! A [`BacktestRequest`] is what a client sends: every field optional. It is
//! normalized once at submission into a [`BacktestConfig`], which is frozen
//! into the job record and never mutated afterwards.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Default symbols when the request names none.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// Default candle timeframe.
pub const DEFAULT_TIMEFRAME: &str = "5m";

/// Default look-back window in days.
pub const DEFAULT_DAYS: i64 = 7;

/// Default model label.
pub const DEFAULT_MODEL_NAME: &str = "persrm-trading";

/// Supported candle timeframes.
pub const SUPPORTED_TIMEFRAMES: [&str; 11] = [
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "12h", "1d",
];

const MAX_SYMBOLS: usize = 50;
const MAX_SYMBOL_LEN: usize = 20;
const MAX_DAYS: i64 = 3650;
const MAX_POSITIONS: i64 = 100;
const SECONDS_PER_DAY: i64 = 86_400;

// =============================================================================
// Request
// =============================================================================

/// Raw submission body. Absent fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    /// Trading pairs to simulate.
    pub symbols: Option<Vec<String>>,
    /// Candle timeframe, e.g. `5m`.
    pub timeframe: Option<String>,
    /// Inclusive range start (`YYYY-MM-DD` or RFC 3339).
    pub start_date: Option<String>,
    /// Range end (`YYYY-MM-DD` or RFC 3339).
    pub end_date: Option<String>,
    /// Look-back window; derived from the range when both dates are given.
    pub days: Option<i64>,
    /// Starting account balance.
    pub initial_balance: Option<f64>,
    /// Max fraction of equity per position.
    pub max_position_size: Option<f64>,
    /// Max simultaneously open positions.
    pub max_concurrent_positions: Option<i64>,
    /// Fee per fill as a fraction of notional.
    pub trading_fee: Option<f64>,
    /// Slippage per fill as a fraction of price.
    pub slippage: Option<f64>,
    /// Drawdown at which the simulation stops trading.
    pub max_drawdown_limit: Option<f64>,
    /// Fraction of equity risked per trade.
    pub risk_per_trade: Option<f64>,
    /// Stop-loss distance as a fraction of entry.
    pub stop_loss_percent: Option<f64>,
    /// Take-profit distance as a fraction of entry.
    pub take_profit_percent: Option<f64>,
    /// Model or strategy label.
    pub model_name: Option<String>,
}

impl BacktestRequest {
    /// Apply defaults and validate, producing the frozen job configuration.
    ///
    /// `now` anchors the date range when no explicit dates are given.
    ///
    /// # Errors
    ///
    /// Returns the first [`BacktestConfigError`] encountered.
    pub fn normalize(self, now: DateTime<Utc>) -> Result<BacktestConfig, BacktestConfigError> {
        let symbols = normalize_symbols(self.symbols)?;

        let timeframe = self
            .timeframe
            .map_or_else(|| DEFAULT_TIMEFRAME.to_string(), |t| t.trim().to_string());
        if !SUPPORTED_TIMEFRAMES.contains(&timeframe.as_str()) {
            return Err(BacktestConfigError::UnsupportedTimeframe(timeframe));
        }

        let requested_days = self.days.unwrap_or(DEFAULT_DAYS);

        let start = self
            .start_date
            .as_deref()
            .map(|v| parse_date("startDate", v))
            .transpose()?;
        let end = self
            .end_date
            .as_deref()
            .map(|v| parse_date("endDate", v))
            .transpose()?;

        let window = if start.is_some() && end.is_some() {
            Duration::zero()
        } else {
            check_days(requested_days)?;
            Duration::days(requested_days)
        };
        let (start_date, end_date, days) = match (start, end) {
            (Some(start), Some(end)) => {
                if start >= end {
                    return Err(BacktestConfigError::InvertedRange);
                }
                let secs = (end - start).num_seconds();
                let days = (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
                check_days(days)?;
                (start, end, days)
            }
            (Some(start), None) => {
                let end = start
                    .checked_add_signed(window)
                    .ok_or_else(|| out_of_range_date("startDate", start))?;
                (start, end, requested_days)
            }
            (None, Some(end)) => {
                let start = end
                    .checked_sub_signed(window)
                    .ok_or_else(|| out_of_range_date("endDate", end))?;
                (start, end, requested_days)
            }
            (None, None) => {
                let start = now
                    .checked_sub_signed(window)
                    .ok_or_else(|| out_of_range_date("days", now))?;
                (start, now, requested_days)
            }
        };

        let initial_balance = self.initial_balance.unwrap_or(100_000.0);
        if !initial_balance.is_finite() || initial_balance <= 0.0 {
            return Err(BacktestConfigError::OutOfRange {
                field: "initialBalance",
                expected: "a positive number",
                value: initial_balance,
            });
        }

        let max_concurrent_positions = self.max_concurrent_positions.unwrap_or(3);
        if !(1..=MAX_POSITIONS).contains(&max_concurrent_positions) {
            return Err(BacktestConfigError::PositionsOutOfRange {
                value: max_concurrent_positions,
                max: MAX_POSITIONS,
            });
        }

        let model_name = self
            .model_name
            .map_or_else(|| DEFAULT_MODEL_NAME.to_string(), |m| m.trim().to_string());
        if model_name.is_empty() {
            return Err(BacktestConfigError::EmptyModelName);
        }

        Ok(BacktestConfig {
            symbols,
            timeframe,
            start_date,
            end_date,
            days: u32::try_from(days).unwrap_or(u32::MAX),
            initial_balance,
            max_position_size: fraction("maxPositionSize", self.max_position_size, 0.1)?,
            max_concurrent_positions: u32::try_from(max_concurrent_positions).unwrap_or(1),
            trading_fee: cost("tradingFee", self.trading_fee, 0.001)?,
            slippage: cost("slippage", self.slippage, 0.0005)?,
            max_drawdown_limit: fraction("maxDrawdownLimit", self.max_drawdown_limit, 0.15)?,
            risk_per_trade: fraction("riskPerTrade", self.risk_per_trade, 0.02)?,
            stop_loss_percent: fraction("stopLossPercent", self.stop_loss_percent, 0.02)?,
            take_profit_percent: fraction("takeProfitPercent", self.take_profit_percent, 0.04)?,
            model_name,
        })
    }
}

// =============================================================================
// Normalized Config
// =============================================================================

/// Immutable snapshot of a job's simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    /// Upper-cased trading pairs.
    pub symbols: Vec<String>,
    /// Candle timeframe.
    pub timeframe: String,
    /// Range start.
    pub start_date: DateTime<Utc>,
    /// Range end.
    pub end_date: DateTime<Utc>,
    /// Whole days covered by the range, rounded up.
    pub days: u32,
    /// Starting account balance.
    pub initial_balance: f64,
    /// Max fraction of equity per position.
    pub max_position_size: f64,
    /// Max simultaneously open positions.
    pub max_concurrent_positions: u32,
    /// Fee per fill.
    pub trading_fee: f64,
    /// Slippage per fill.
    pub slippage: f64,
    /// Drawdown limit.
    pub max_drawdown_limit: f64,
    /// Fraction of equity risked per trade.
    pub risk_per_trade: f64,
    /// Stop-loss distance.
    pub stop_loss_percent: f64,
    /// Take-profit distance.
    pub take_profit_percent: f64,
    /// Model or strategy label.
    pub model_name: String,
}

// =============================================================================
// Validation
// =============================================================================

/// The window around an anchor date left chrono's representable range.
fn out_of_range_date(field: &'static str, anchor: DateTime<Utc>) -> BacktestConfigError {
    BacktestConfigError::InvalidDate {
        field,
        value: anchor.to_rfc3339(),
    }
}

fn normalize_symbols(raw: Option<Vec<String>>) -> Result<Vec<String>, BacktestConfigError> {
    let symbols: Vec<String> = raw.map_or_else(
        || DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
        |list| list.iter().map(|s| s.trim().to_uppercase()).collect(),
    );

    if symbols.is_empty() {
        return Err(BacktestConfigError::EmptySymbols);
    }
    if symbols.len() > MAX_SYMBOLS {
        return Err(BacktestConfigError::TooManySymbols {
            count: symbols.len(),
            max: MAX_SYMBOLS,
        });
    }
    if let Some(bad) = symbols.iter().find(|s| {
        s.is_empty() || s.len() > MAX_SYMBOL_LEN || !s.chars().all(|c| c.is_ascii_alphanumeric())
    }) {
        return Err(BacktestConfigError::InvalidSymbol(bad.clone()));
    }
    Ok(symbols)
}

fn check_days(days: i64) -> Result<(), BacktestConfigError> {
    if days < 1 || days > MAX_DAYS {
        return Err(BacktestConfigError::DaysOutOfRange {
            value: days,
            max: MAX_DAYS,
        });
    }
    Ok(())
}

fn parse_date(field: &'static str, value: &str) -> Result<DateTime<Utc>, BacktestConfigError> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| BacktestConfigError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

fn fraction(
    field: &'static str,
    value: Option<f64>,
    default: f64,
) -> Result<f64, BacktestConfigError> {
    let v = value.unwrap_or(default);
    if v.is_finite() && v > 0.0 && v <= 1.0 {
        Ok(v)
    } else {
        Err(BacktestConfigError::OutOfRange {
            field,
            expected: "in (0, 1]",
            value: v,
        })
    }
}

fn cost(field: &'static str, value: Option<f64>, default: f64) -> Result<f64, BacktestConfigError> {
    let v = value.unwrap_or(default);
    if v.is_finite() && (0.0..1.0).contains(&v) {
        Ok(v)
    } else {
        Err(BacktestConfigError::OutOfRange {
            field,
            expected: "in [0, 1)",
            value: v,
        })
    }
}

/// Submission validation failure. No job is created.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BacktestConfigError {
    /// Symbol list was empty.
    #[error("symbols must not be empty")]
    EmptySymbols,

    /// Too many symbols in one job.
    #[error("too many symbols: {count} (max {max})")]
    TooManySymbols {
        /// Number supplied.
        count: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Symbol was blank, too long, or not alphanumeric.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// Timeframe not in the supported set.
    #[error("unsupported timeframe: {0:?}")]
    UnsupportedTimeframe(String),

    /// Date string could not be parsed.
    #[error("{field} is not a valid date: {value:?}")]
    InvalidDate {
        /// Request field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// `startDate` is not before `endDate`.
    #[error("startDate must be before endDate")]
    InvertedRange,

    /// Day count outside the accepted window.
    #[error("days must be between 1 and {max}, got {value}")]
    DaysOutOfRange {
        /// Supplied or derived value.
        value: i64,
        /// Allowed maximum.
        max: i64,
    },

    /// Numeric parameter outside its range.
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        /// Request field name.
        field: &'static str,
        /// Human-readable range.
        expected: &'static str,
        /// Supplied value.
        value: f64,
    },

    /// Position cap outside the accepted window.
    #[error("maxConcurrentPositions must be between 1 and {max}, got {value}")]
    PositionsOutOfRange {
        /// Supplied value.
        value: i64,
        /// Allowed maximum.
        max: i64,
    },

    /// Model label was blank.
    #[error("modelName must not be empty")]
    EmptyModelName,
}

impl BacktestConfigError {
    /// The request field the error refers to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptySymbols | Self::TooManySymbols { .. } | Self::InvalidSymbol(_) => "symbols",
            Self::UnsupportedTimeframe(_) => "timeframe",
            Self::InvalidDate { field, .. } | Self::OutOfRange { field, .. } => field,
            Self::InvertedRange => "startDate",
            Self::DaysOutOfRange { .. } => "days",
            Self::PositionsOutOfRange { .. } => "maxConcurrentPositions",
            Self::EmptyModelName => "modelName",
        }
    }
}
