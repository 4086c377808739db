//! Configuration Module
//!
//! Configuration loading for the scheduler service.

mod settings;

pub use settings::{
    ConfigError, EngineSettings, PersistenceMode, SchedulerConfig, ServerSettings,
    StorageSettings, StreamSettings,
};
