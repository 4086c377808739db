//! Domain Layer - Backtest job entity and the in-memory registry.
//!
//! This layer contains the job record, its state machine, and the registry
//! that holds records for the process lifetime. Nothing here performs I/O
//! or spawns tasks.

/// Job record, configuration, and lifecycle status.
pub mod job;

/// In-memory job registry.
pub mod registry;
