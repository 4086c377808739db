//! Job Store Adapters
//!
//! - `JsonFileStore`: index and artifacts as JSON under a data directory
//! - `InMemoryJobStore`: volatile store for tests and ephemeral runs

mod file_store;
mod in_memory;

pub use file_store::JsonFileStore;
pub use in_memory::InMemoryJobStore;
