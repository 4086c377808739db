//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the scheduler services and the port interfaces
//! that define how they reach the simulation engine and durable storage.

/// Port interfaces for external systems (engine, job store).
pub mod ports;

/// Scheduler, execution, publishing, and recovery services.
pub mod services;
