//! Scheduler Configuration Settings
//!
//! Configuration types for the backtest scheduler, loaded from environment
//! variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::SchedulerSettings;

/// Where job state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// JSON files under the data directory.
    #[default]
    File,
    /// Process memory only; nothing survives a restart.
    Memory,
}

impl PersistenceMode {
    /// Parse mode from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Some(Self::File),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind address.
    pub host: IpAddr,
    /// HTTP port for the API, health, and metrics routes.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8090,
        }
    }
}

impl ServerSettings {
    /// Socket address to bind.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Persistence settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Store backend.
    pub mode: PersistenceMode,
    /// Root for the index and result artifacts.
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::File,
            data_dir: PathBuf::from("./data/backtests"),
        }
    }
}

/// Status stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Fallback poll interval for status streams.
    pub poll_interval: Duration,
    /// Capacity of the job event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            event_capacity: 1024,
        }
    }
}

/// Synthetic engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Delay per simulated candle.
    pub tick_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_delay: Duration::from_millis(25),
        }
    }
}

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Admission and retention settings.
    pub scheduler: SchedulerSettings,
    /// Persistence settings.
    pub storage: StorageSettings,
    /// Status stream settings.
    pub stream: StreamSettings,
    /// Engine settings.
    pub engine: EngineSettings,
}

impl SchedulerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed or out of
    /// range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed or out of
    /// range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            host: env.parse("BACKTEST_HTTP_HOST", defaults.server.host)?,
            port: env.parse("BACKTEST_HTTP_PORT", defaults.server.port)?,
        };

        let max_concurrent: usize =
            env.parse("BACKTEST_MAX_CONCURRENT", defaults.scheduler.max_concurrent)?;
        if max_concurrent == 0 {
            return Err(ConfigError::invalid("BACKTEST_MAX_CONCURRENT", "0", "must be at least 1"));
        }
        let history_limit: usize =
            env.parse("BACKTEST_HISTORY_LIMIT", defaults.scheduler.history_limit)?;
        if history_limit == 0 {
            return Err(ConfigError::invalid("BACKTEST_HISTORY_LIMIT", "0", "must be at least 1"));
        }
        let timeout_secs: u64 = env.parse("BACKTEST_JOB_TIMEOUT_SECS", 0)?;
        let scheduler = SchedulerSettings {
            max_concurrent,
            history_limit,
            job_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        };

        let mode = match env.get("BACKTEST_PERSISTENCE")? {
            Some(raw) => PersistenceMode::from_str_case_insensitive(&raw)
                .ok_or_else(|| ConfigError::invalid("BACKTEST_PERSISTENCE", &raw, "expected file or memory"))?,
            None => defaults.storage.mode,
        };
        let storage = StorageSettings {
            mode,
            data_dir: env
                .get("BACKTEST_DATA_DIR")?
                .map_or(defaults.storage.data_dir, PathBuf::from),
        };

        let poll_ms: u64 = env.parse("BACKTEST_STREAM_POLL_MS", 500)?;
        if poll_ms == 0 {
            return Err(ConfigError::invalid("BACKTEST_STREAM_POLL_MS", "0", "must be at least 1"));
        }
        let event_capacity: usize =
            env.parse("BACKTEST_EVENT_CAPACITY", defaults.stream.event_capacity)?;
        if event_capacity == 0 {
            return Err(ConfigError::invalid("BACKTEST_EVENT_CAPACITY", "0", "must be at least 1"));
        }
        let stream = StreamSettings {
            poll_interval: Duration::from_millis(poll_ms),
            event_capacity,
        };

        let engine = EngineSettings {
            tick_delay: Duration::from_millis(env.parse("BACKTEST_ENGINE_TICK_MS", 25)?),
        };

        Ok(Self {
            server,
            scheduler,
            storage,
            stream,
            engine,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What was expected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            other => Ok(other),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)?.map_or(Ok(default), |raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e.to_string()))
        })
    }
}
