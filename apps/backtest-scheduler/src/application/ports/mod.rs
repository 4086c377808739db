//! Port Interfaces
//!
//! Defines the interfaces (ports) the scheduler depends on, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these contracts.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SimulationEngine`: runs one backtest with progress and cancellation
//! - `JobStore`: durable trimmed index plus per-job result artifacts

mod job_store_port;
mod simulation_engine_port;

pub use job_store_port::{JobStore, PersistenceError};
pub use simulation_engine_port::{
    EngineConfig, EngineError, ExecutionCosts, ProgressCallback, RiskParameters, SimulationEngine,
};
