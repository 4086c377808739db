//! Simulation Engine Adapters
//!
//! - `SyntheticEngine`: seeded random-walk engine used by the binary
//! - `ScriptedEngine`: test engine driven step by step through run handles

mod scripted;
mod synthetic;

pub use scripted::{RunHandle, ScriptedEngine, sample_result};
pub use synthetic::{MAX_STEPS, SyntheticEngine, step_count};
