//! Synthetic simulation engine.
//!
//! Walks a seeded random price series per symbol across the configured
//! window and trades it with a naive entry rule bounded by the risk
//! parameters. Good enough to exercise the scheduler end to end without
//! market data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EngineConfig, EngineError, ProgressCallback, SimulationEngine};
use crate::domain::job::{BacktestResult, DateRange};

/// Upper bound on simulated candles per run.
pub const MAX_STEPS: usize = 500;

const ENTRY_PROBABILITY: f64 = 0.08;
const STEP_VOLATILITY: f64 = 0.004;
const STARTING_PRICE: f64 = 100.0;

/// Random-walk backtest engine.
#[derive(Debug, Clone)]
pub struct SyntheticEngine {
    tick_delay: Duration,
    seed: Option<u64>,
}

impl Default for SyntheticEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(25))
    }
}

impl SyntheticEngine {
    /// Create an engine that pauses `tick_delay` between candles.
    #[must_use]
    pub const fn new(tick_delay: Duration) -> Self {
        Self {
            tick_delay,
            seed: None,
        }
    }

    /// Use a fixed seed instead of one derived from the configuration.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn seed_for(&self, config: &EngineConfig) -> u64 {
        self.seed.unwrap_or_else(|| {
            let mut seed = config.start.timestamp().unsigned_abs();
            for byte in config.symbols.iter().flat_map(|s| s.bytes()) {
                seed = seed.wrapping_mul(31).wrapping_add(u64::from(byte));
            }
            seed
        })
    }
}

/// Number of candles in the window, capped at [`MAX_STEPS`].
#[must_use]
pub fn step_count(config: &EngineConfig) -> usize {
    let minutes = timeframe_minutes(&config.timeframe).unwrap_or(60);
    let window = (config.end - config.start).num_minutes().max(0);
    let candles = usize::try_from(window / minutes).unwrap_or(usize::MAX);
    candles.clamp(1, MAX_STEPS)
}

fn timeframe_minutes(timeframe: &str) -> Option<i64> {
    let split = timeframe.len().checked_sub(1)?;
    let (count, unit) = timeframe.split_at(split);
    let count: i64 = count.parse().ok()?;
    let scale = match unit {
        "m" => 1,
        "h" => 60,
        "d" => 1440,
        _ => return None,
    };
    (count > 0).then_some(count * scale)
}

#[derive(Debug)]
struct Position {
    symbol: String,
    entry_price: f64,
    quantity: f64,
    opened_at: DateTime<Utc>,
}

#[async_trait]
impl SimulationEngine for SyntheticEngine {
    async fn run(
        &self,
        config: EngineConfig,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<BacktestResult, EngineError> {
        if config.symbols.is_empty() {
            return Err(EngineError::failed("no symbols to simulate"));
        }

        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.seed_for(&config));
        let steps = step_count(&config);
        let step_span = (config.end - config.start) / i32::try_from(steps).unwrap_or(i32::MAX);

        let mut prices: HashMap<String, f64> = config
            .symbols
            .iter()
            .map(|s| (s.clone(), STARTING_PRICE * rng.random_range(0.5..2.0)))
            .collect();
        let mut cash = config.initial_balance;
        let mut peak = cash;
        let mut halted = false;
        let mut open: Vec<Position> = Vec::new();
        let mut trades: Vec<Value> = Vec::new();
        let mut signals: Vec<Value> = Vec::new();
        let mut equity_curve: Vec<Value> = Vec::with_capacity(steps);
        let mut wins = 0_u32;

        for step in 0..steps {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let at = config.start + step_span * i32::try_from(step).unwrap_or(i32::MAX);

            for price in prices.values_mut() {
                let shock = rng.random_range(-1.0..1.0) * STEP_VOLATILITY;
                *price *= 1.0 + shock;
            }

            // Exits
            let mut still_open = Vec::with_capacity(open.len());
            for position in open.drain(..) {
                let price = prices[&position.symbol];
                let change = price / position.entry_price - 1.0;
                if change >= config.risk.take_profit_percent
                    || change <= -config.risk.stop_loss_percent
                    || halted
                {
                    let exit_price = price * (1.0 - config.costs.slippage);
                    let gross = exit_price * position.quantity;
                    let fee = gross * config.costs.trading_fee;
                    let pnl = (exit_price - position.entry_price) * position.quantity - fee;
                    cash += gross - fee;
                    if pnl > 0.0 {
                        wins += 1;
                    }
                    trades.push(json!({
                        "symbol": position.symbol,
                        "side": "long",
                        "entryPrice": position.entry_price,
                        "exitPrice": exit_price,
                        "quantity": position.quantity,
                        "pnl": pnl,
                        "openedAt": position.opened_at,
                        "closedAt": at,
                    }));
                } else {
                    still_open.push(position);
                }
            }
            open = still_open;

            // Entries
            if !halted {
                for symbol in &config.symbols {
                    let slots_left = open.len() < config.risk.max_concurrent_positions as usize;
                    let holding = open.iter().any(|p| &p.symbol == symbol);
                    if !slots_left || holding || rng.random::<f64>() >= ENTRY_PROBABILITY {
                        continue;
                    }
                    let entry_price = prices[symbol] * (1.0 + config.costs.slippage);
                    let budget = (cash * config.risk.max_position_size)
                        .min(cash * config.risk.risk_per_trade / config.risk.stop_loss_percent.max(f64::EPSILON));
                    let quantity = budget / entry_price;
                    let fee = budget * config.costs.trading_fee;
                    if quantity <= 0.0 || budget + fee > cash {
                        continue;
                    }
                    cash -= budget + fee;
                    signals.push(json!({
                        "symbol": symbol,
                        "action": "buy",
                        "price": entry_price,
                        "timestamp": at,
                        "model": config.model_name,
                    }));
                    open.push(Position {
                        symbol: symbol.clone(),
                        entry_price,
                        quantity,
                        opened_at: at,
                    });
                }
            }

            let equity = cash
                + open
                    .iter()
                    .map(|p| prices[&p.symbol] * p.quantity)
                    .sum::<f64>();
            peak = peak.max(equity);
            if peak > 0.0 && (peak - equity) / peak >= config.risk.max_drawdown_limit {
                halted = true;
            }
            equity_curve.push(json!({ "timestamp": at, "equity": equity }));

            #[allow(clippy::cast_precision_loss)]
            progress(((step + 1) as f64 / steps as f64) * 100.0);

            if !self.tick_delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(EngineError::Cancelled),
                    () = tokio::time::sleep(self.tick_delay) => {}
                }
            }
        }

        let final_equity = cash
            + open
                .iter()
                .map(|p| prices[&p.symbol] * p.quantity)
                .sum::<f64>();
        let total_return = if config.initial_balance > 0.0 {
            final_equity / config.initial_balance - 1.0
        } else {
            0.0
        };
        let max_drawdown = max_drawdown(&equity_curve);
        #[allow(clippy::cast_precision_loss)]
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            f64::from(wins) / trades.len() as f64
        };

        let positions: Vec<Value> = open
            .iter()
            .map(|p| {
                json!({
                    "symbol": p.symbol,
                    "quantity": p.quantity,
                    "entryPrice": p.entry_price,
                    "markPrice": prices[&p.symbol],
                })
            })
            .collect();

        Ok(BacktestResult {
            portfolio: json!({
                "initialBalance": config.initial_balance,
                "cash": cash,
                "equity": final_equity,
                "openPositions": positions,
            }),
            metrics: json!({
                "totalReturn": total_return,
                "maxDrawdown": max_drawdown,
                "tradeCount": trades.len(),
                "winRate": win_rate,
                "haltedOnDrawdown": halted,
            }),
            trades,
            equity_curve,
            signals,
            date_range: DateRange {
                start: config.start,
                end: config.end,
            },
            duration: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

fn max_drawdown(curve: &[Value]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for equity in curve.iter().filter_map(|p| p["equity"].as_f64()) {
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = worst.max((peak - equity) / peak);
        }
    }
    worst
}
